//! Outbound commands to the instrumented process.
//!
//! The engine talks back to the bridge through a [`CommandSink`]. Commands
//! are fire-and-forget: results, if any, arrive later as ordinary inbound
//! events.
//!
//! ## Built-in Sinks
//!
//! - [`LogCommandSink`]: structured logging only (replays, debugging)
//! - [`ChannelCommandSink`]: forwards commands over a tokio channel to the
//!   task that owns the bridge
//!
//! ## Custom Sinks
//!
//! ```rust,ignore
//! use netlens::commands::{Command, CommandError, CommandSink};
//!
//! struct BridgeSink { /* ... */ }
//!
//! impl CommandSink for BridgeSink {
//!     fn name(&self) -> &str {
//!         "bridge"
//!     }
//!
//!     fn send(&self, command: Command) -> Result<(), CommandError> {
//!         // Hand the command to the transport
//!         Ok(())
//!     }
//! }
//! ```

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Errors that can occur while sending a command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The receiving side of the channel is gone
    #[error("command channel closed")]
    Closed,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A command for the instrumented process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    /// Ask for the response body of an HTTP entry. The body comes back as a
    /// `response-body` event echoing `token`.
    RequestResponseBody { id: String, token: Uuid },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::RequestResponseBody { .. } => "request-response-body",
        }
    }

    pub fn entry_id(&self) -> &str {
        match self {
            Command::RequestResponseBody { id, .. } => id,
        }
    }
}

/// Where commands go.
///
/// Sinks must be `Send + Sync` so the engine can live on a spawned task.
pub trait CommandSink: Send + Sync {
    /// Returns the name of this sink (e.g., "log", "channel")
    fn name(&self) -> &str;

    /// Hand off a command. Must not block.
    fn send(&self, command: Command) -> Result<(), CommandError>;
}

/// A sink that only logs commands.
#[derive(Debug, Clone)]
pub struct LogCommandSink {
    prefix: String,
}

impl LogCommandSink {
    pub fn new() -> Self {
        Self {
            prefix: "command".to_string(),
        }
    }

    /// The prefix appears in log messages
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LogCommandSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSink for LogCommandSink {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&self, command: Command) -> Result<(), CommandError> {
        let payload = serde_json::to_string(&command)?;
        info!(
            prefix = %self.prefix,
            command = %command.name(),
            entry_id = %command.entry_id(),
            payload = %payload,
            "[{}] Command issued: {}",
            self.prefix,
            command.name()
        );
        Ok(())
    }
}

/// A sink that forwards commands to a channel.
#[derive(Debug, Clone)]
pub struct ChannelCommandSink {
    sender: mpsc::UnboundedSender<Command>,
}

impl ChannelCommandSink {
    pub fn new(sender: mpsc::UnboundedSender<Command>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiver its commands arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl CommandSink for ChannelCommandSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn send(&self, command: Command) -> Result<(), CommandError> {
        self.sender.send(command).map_err(|_| CommandError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_request() -> Command {
        Command::RequestResponseBody {
            id: "req-1".to_string(),
            token: Uuid::nil(),
        }
    }

    #[test]
    fn test_command_serialize() {
        let json = serde_json::to_value(body_request()).unwrap();
        assert_eq!(json["type"], "request-response-body");
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["token"], Uuid::nil().to_string());
    }

    #[test]
    fn test_log_sink() {
        let sink = LogCommandSink::with_prefix("replay");
        assert_eq!(sink.name(), "log");
        assert!(sink.send(body_request()).is_ok());
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, mut receiver) = ChannelCommandSink::channel();
        sink.send(body_request()).unwrap();

        assert_eq!(receiver.try_recv().unwrap(), body_request());
    }

    #[test]
    fn test_channel_sink_closed() {
        let (sink, receiver) = ChannelCommandSink::channel();
        drop(receiver);

        assert!(matches!(sink.send(body_request()), Err(CommandError::Closed)));
    }
}
