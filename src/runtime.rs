//! Async runtime around the engine.
//!
//! [`spawn`] moves an [`Engine`] onto a tokio task that consumes bridge
//! events and panel commands over mpsc channels, one at a time. The task
//! stops when a [`ShutdownSignal`] fires or when both inputs are closed, and
//! hands the engine back together with its [`RuntimeStats`].
//!
//! ```rust,ignore
//! let handle = runtime::spawn(engine, &config.runtime);
//! let reader = handle.reader();
//!
//! handle.send(event).await?;
//! handle.command(PanelCommand::RequestResponseBody("req-1".into()))?;
//!
//! let snapshot = reader.load();
//! let (engine, stats) = handle.join().await?;
//! ```

use crate::config::RuntimeConfig;
use crate::engine::{Engine, EngineReader, Outcome};
use crate::event::BridgeEvent;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors from talking to a running engine.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("engine task is no longer running")]
    Closed,

    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Requests from the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    /// Fetch the response body of an HTTP entry
    RequestResponseBody(String),
    /// Clear everything and start a new session
    Reset,
}

/// Totals for one runtime lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    pub events_processed: u64,
    pub events_ignored: u64,
    pub anomalies: u64,
    pub commands_processed: u64,
    pub command_failures: u64,
}

/// A signal for coordinating shutdown of the engine task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown manually.
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        let _ = self.sender.send(());
    }

    /// Wait for Ctrl+C (or SIGTERM on unix), then notify all receivers.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a spawned engine task.
pub struct RuntimeHandle {
    events: mpsc::Sender<BridgeEvent>,
    commands: mpsc::UnboundedSender<PanelCommand>,
    reader: EngineReader,
    shutdown: ShutdownSignal,
    task: JoinHandle<(Engine, RuntimeStats)>,
}

impl RuntimeHandle {
    /// A sender for bridge events, for feeding from another task.
    pub fn events(&self) -> mpsc::Sender<BridgeEvent> {
        self.events.clone()
    }

    /// Deliver one bridge event, waiting while the channel is full.
    pub async fn send(&self, event: BridgeEvent) -> Result<(), RuntimeError> {
        self.events.send(event).await.map_err(|_| RuntimeError::Closed)
    }

    pub fn command(&self, command: PanelCommand) -> Result<(), RuntimeError> {
        self.commands.send(command).map_err(|_| RuntimeError::Closed)
    }

    pub fn reader(&self) -> EngineReader {
        self.reader.clone()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Close the inputs and wait for everything already queued to be handled.
    pub async fn join(self) -> Result<(Engine, RuntimeStats), RuntimeError> {
        let Self {
            events,
            commands,
            task,
            ..
        } = self;
        drop(events);
        drop(commands);
        Ok(task.await?)
    }

    /// Stop without draining queued input.
    pub async fn stop(self) -> Result<(Engine, RuntimeStats), RuntimeError> {
        self.shutdown.trigger();
        self.join().await
    }
}

/// Move `engine` onto a new task.
pub fn spawn(engine: Engine, config: &RuntimeConfig) -> RuntimeHandle {
    let (events, event_rx) = mpsc::channel(config.channel_capacity.max(1));
    let (commands, command_rx) = mpsc::unbounded_channel();
    let shutdown = ShutdownSignal::new();
    let reader = engine.reader();

    let task = tokio::spawn(run(
        engine,
        event_rx,
        command_rx,
        shutdown.subscribe(),
        config.stats_interval.max(1),
    ));

    RuntimeHandle {
        events,
        commands,
        reader,
        shutdown,
        task,
    }
}

async fn run(
    mut engine: Engine,
    mut events: mpsc::Receiver<BridgeEvent>,
    mut commands: mpsc::UnboundedReceiver<PanelCommand>,
    mut shutdown: broadcast::Receiver<()>,
    stats_interval: u64,
) -> (Engine, RuntimeStats) {
    info!(session = %engine.session().0, "Engine task started");

    let mut stats = RuntimeStats::default();
    let mut events_open = true;
    let mut commands_open = true;

    while events_open || commands_open {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping engine task");
                break;
            }

            command = commands.recv(), if commands_open => match command {
                Some(command) => apply_command(&mut engine, command, &mut stats),
                None => commands_open = false,
            },

            event = events.recv(), if events_open => match event {
                Some(event) => {
                    let result = engine.handle(event);
                    stats.events_processed += 1;
                    if result.outcome == Outcome::Ignored {
                        stats.events_ignored += 1;
                    }
                    if result.anomaly.is_some() {
                        stats.anomalies += 1;
                    }

                    if stats.events_processed.is_multiple_of(stats_interval) {
                        info!(
                            events_processed = stats.events_processed,
                            events_ignored = stats.events_ignored,
                            anomalies = stats.anomalies,
                            entries = engine.snapshot().len(),
                            "Engine statistics"
                        );
                    }
                }
                None => events_open = false,
            },
        }
    }

    info!(
        events_processed = stats.events_processed,
        events_ignored = stats.events_ignored,
        anomalies = stats.anomalies,
        commands_processed = stats.commands_processed,
        "Engine task stopped"
    );

    (engine, stats)
}

fn apply_command(engine: &mut Engine, command: PanelCommand, stats: &mut RuntimeStats) {
    stats.commands_processed += 1;

    match command {
        PanelCommand::RequestResponseBody(id) => {
            if let Err(e) = engine.request_response_body(&id) {
                stats.command_failures += 1;
                warn!(entry_id = %id, error = %e, "Body request failed");
            }
        }
        PanelCommand::Reset => {
            debug!("Reset requested by panel");
            engine.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ChannelCommandSink, Command, LogCommandSink};
    use crate::config::EngineConfig;
    use crate::entry::{HttpStatus, NetworkEntry};
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> Engine {
        Engine::new(&EngineConfig::default(), Box::new(LogCommandSink::new()))
    }

    fn request(id: &str) -> Vec<BridgeEvent> {
        vec![
            BridgeEvent::new(
                "request-start",
                json!({"id": id, "url": "/a", "method": "GET"}),
            ),
            BridgeEvent::new("response-start", json!({"id": id, "statusCode": 200})),
            BridgeEvent::new("response-end", json!({"id": id})),
        ]
    }

    #[tokio::test]
    async fn test_processes_events_in_order() {
        let handle = spawn(engine(), &RuntimeConfig::default());
        let reader = handle.reader();

        for event in request("1") {
            handle.send(event).await.unwrap();
        }
        handle
            .send(BridgeEvent::new("grpc-call", json!({})))
            .await
            .unwrap();

        let (engine, stats) = handle.join().await.unwrap();
        assert_eq!(stats.events_processed, 4);
        assert_eq!(stats.events_ignored, 1);
        assert_eq!(stats.anomalies, 1);

        let snapshot = reader.load();
        assert_eq!(
            snapshot.entry("1").and_then(NetworkEntry::as_http).map(|e| e.status),
            Some(HttpStatus::Complete)
        );
        assert_eq!(engine.counters().events_handled, 4);
    }

    #[tokio::test]
    async fn test_body_request_command() {
        let (sink, mut outbound) = ChannelCommandSink::channel();
        let engine = Engine::new(&EngineConfig::default(), Box::new(sink));
        let handle = spawn(engine, &RuntimeConfig::default());

        for event in request("1") {
            handle.send(event).await.unwrap();
        }

        // Commands are polled ahead of events, so wait for the entry first.
        let reader = handle.reader();
        tokio::time::timeout(Duration::from_secs(1), async {
            while reader.load().entry("1").map_or(true, |e| !e.is_terminal()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        handle
            .command(PanelCommand::RequestResponseBody("1".to_string()))
            .unwrap();
        handle
            .command(PanelCommand::RequestResponseBody("missing".to_string()))
            .unwrap();

        let (engine, stats) = handle.join().await.unwrap();
        assert_eq!(stats.commands_processed, 2);
        assert_eq!(stats.command_failures, 1);
        assert_eq!(engine.pending_bodies(), 1);
        assert!(matches!(
            outbound.try_recv(),
            Ok(Command::RequestResponseBody { id, .. }) if id == "1"
        ));
    }

    #[tokio::test]
    async fn test_reset_command_clears_store() {
        let handle = spawn(engine(), &RuntimeConfig::default());
        let reader = handle.reader();

        for event in request("1") {
            handle.send(event).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(1), async {
            while reader.load().entry("1").map_or(true, |e| !e.is_terminal()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        handle.command(PanelCommand::Reset).unwrap();
        let (engine, _) = handle.join().await.unwrap();

        assert_eq!(engine.counters().resets, 1);
        assert!(engine.entries(None).is_empty());
        assert!(reader.load().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let handle = spawn(engine(), &RuntimeConfig::default());
        let events = handle.events();

        let result = tokio::time::timeout(Duration::from_secs(1), handle.stop()).await;
        let (_, stats) = result.unwrap().unwrap();
        assert_eq!(stats.events_processed, 0);

        // The task is gone, so the channel is closed.
        assert!(events.send(BridgeEvent::new("error", json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn test_manual_trigger_reaches_subscribers() {
        let signal = ShutdownSignal::new();
        let mut receiver = signal.subscribe();

        let trigger_signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger_signal.trigger();
        });

        let result = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
        assert!(result.is_ok());
    }
}
