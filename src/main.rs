//! netlens replay - feeds a recorded bridge session through the engine.
//!
//! ## Usage
//!
//! ```text
//! netlens recording.jsonl
//! NETLENS_REPLAY=recording.jsonl netlens
//! ```
//!
//! Each line of the recording is one bridge event:
//!
//! ```json
//! {"type": "request-start", "payload": {"id": "1", "url": "/a", "method": "GET"}, "timestamp": 1733911200000}
//! ```
//!
//! ## Configuration
//!
//! Environment variables:
//! - `NETLENS_REPLAY`: recording to replay when no argument is given
//! - `NETLENS_CONFIG`: config file (default: `config/netlens.toml`)
//! - `RUST_LOG`: Logging level (default: "info")

use netlens::commands::LogCommandSink;
use netlens::config::EngineConfig;
use netlens::engine::{Engine, EngineReader};
use netlens::entry::{Direction, HttpStatus, NetworkEntry};
use netlens::event::BridgeEvent;
use netlens::projection::{EntryRow, MessageSelection};
use netlens::runtime::{self, RuntimeHandle};
use std::env;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Anomalies printed after the entry table
const ANOMALY_REPORT_LIMIT: usize = 20;

/// Most recent messages printed per connection
const MESSAGE_REPORT_LIMIT: usize = 10;

/// Read the recording line by line into the engine task.
///
/// Returns the number of events delivered.
async fn feed(handle: &RuntimeHandle, path: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut delivered = 0;
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: BridgeEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping unparseable recording line");
                continue;
            }
        };

        handle.send(event).await?;
        delivered += 1;
    }

    Ok(delivered)
}

fn print_rows(reader: &EngineReader, rows: &[EntryRow]) {
    println!(
        "{:<5} {:<7} {:<10} {:>8}  {:<12}  {:<8}  URL",
        "TYPE", "METHOD", "STATUS", "TIME", "STARTED", "BODY"
    );
    for row in rows {
        let duration = row
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let body = reader.body(&row.id).map_or("", |view| view.label());
        println!(
            "{:<5} {:<7} {:<10} {:>8}  {:<12}  {:<8}  {}",
            row.label, row.method, row.status, duration, row.started, body, row.url
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = match env::args().nth(1).or_else(|| env::var("NETLENS_REPLAY").ok()) {
        Some(path) => path,
        None => return Err("usage: netlens <recording.jsonl> (or set NETLENS_REPLAY)".into()),
    };

    let config = match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            EngineConfig::default()
        }
    };
    let filter = config.filter.spec()?;

    info!(path = %path, "netlens replay starting");

    let engine = Engine::new(&config, Box::new(LogCommandSink::with_prefix("replay")));
    let handle = runtime::spawn(engine, &config.runtime);
    let shutdown = handle.shutdown_signal();

    tokio::select! {
        fed = feed(&handle, &path) => {
            let delivered = fed?;
            info!(events = delivered, "Recording delivered");
        }
        _ = shutdown.wait() => {
            warn!("Replay interrupted");
        }
    }

    let (mut engine, stats) = handle.join().await?;

    // Bodies cannot arrive during a replay; requesting them logs the commands
    // a live bridge would receive.
    let completed: Vec<String> = engine
        .entries(None)
        .into_iter()
        .filter_map(NetworkEntry::as_http)
        .filter(|http| http.status == HttpStatus::Complete)
        .map(|http| http.id.clone())
        .collect();
    for id in &completed {
        if let Err(e) = engine.request_response_body(id) {
            warn!(entry_id = %id, error = %e, "Body request failed");
        }
    }

    let rows: Vec<EntryRow> = engine
        .entries(Some(&filter))
        .into_iter()
        .map(EntryRow::of)
        .collect();
    let reader = engine.reader();
    print_rows(&reader, &rows);
    for row in rows.iter().filter(|row| row.label != "XHR") {
        let Some(messages) = reader.message_rows(&row.id, config.projection.preview_chars) else {
            continue;
        };
        println!();
        println!("{} {} ({} messages)", row.label, row.url, messages.len());
        for message in messages.iter().rev().take(MESSAGE_REPORT_LIMIT).rev() {
            let arrow = match message.direction {
                Some(Direction::Sent) => "↑",
                Some(Direction::Received) => "↓",
                None => " ",
            };
            println!(
                "  {} {} {:<10} {}",
                message.time, arrow, message.kind, message.preview
            );
        }
        if let Some(latest) = messages.last() {
            let selection = MessageSelection::new(row.id.clone(), latest.id);
            if let Some(detail) = reader.message_detail(&selection) {
                println!("  latest:");
                for line in detail.lines() {
                    println!("    {}", line);
                }
            }
        }
    }

    let anomalies = engine.anomalies();
    if !anomalies.is_empty() {
        println!();
        println!("Anomalies ({} total):", anomalies.total());
        for anomaly in anomalies.recent(ANOMALY_REPORT_LIMIT) {
            println!(
                "  [{}] {} {}: {}",
                anomaly.kind,
                anomaly.event_type,
                anomaly.entry_id.as_deref().unwrap_or("-"),
                anomaly.detail
            );
        }
    }

    info!(
        events_processed = stats.events_processed,
        events_ignored = stats.events_ignored,
        anomalies = stats.anomalies,
        entries = rows.len(),
        bodies_requested = engine.counters().bodies_requested,
        "Replay complete"
    );

    Ok(())
}
