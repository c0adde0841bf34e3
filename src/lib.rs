//! # netlens
//!
//! Network activity engine for a developer-tools inspector panel.
//!
//! An instrumented process reports HTTP requests, WebSocket connections and
//! Server-Sent-Events streams as a sequence of bridge events. The engine
//! folds those events into one entry per request or connection, keeps
//! bounded message histories, fetches response bodies on demand and serves
//! filtered, snapshot-consistent views to the panel.
//!
//! ## Architecture
//!
//! ```text
//! Bridge -> mpsc -> Runtime -> Engine -> Dispatcher -> Reducers -> EntryStore
//!                                 |                                   |
//!                            CommandSink                      StoreSnapshot -> Panel
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Inbound bridge events and their typed forms
//! - [`entry`]: Tracked entries and their lifecycles
//! - [`dispatcher`]: Event routing and decoding
//! - [`reducer`]: Per-protocol state transitions
//! - [`store`]: Entry store and published snapshots
//! - [`engine`]: The consumer tying it all together
//! - [`runtime`]: Async task around the engine
//! - [`projection`], [`filter`], [`cookies`]: Read-side views

pub mod anomaly;
pub mod buffer;
pub mod commands;
pub mod config;
pub mod cookies;
pub mod correlation;
pub mod dispatcher;
pub mod engine;
pub mod entry;
pub mod event;
pub mod filter;
pub mod projection;
pub mod reducer;
pub mod runtime;
pub mod store;

// Re-export commonly used types at crate root
pub use commands::{Command, CommandError, CommandSink};
pub use config::EngineConfig;
pub use engine::{DispatchResult, Engine, EngineError, EngineReader};
pub use entry::{NetworkEntry, Protocol};
pub use event::BridgeEvent;
pub use filter::FilterSpec;
pub use store::StoreSnapshot;

/// Default message history size for WebSocket and SSE entries
pub const DEFAULT_MESSAGE_CAPACITY: usize = 500;
