//! # Host Bridge Traits
//!
//! Contracts between the song store core and the host it is embedded in.
//!
//! ## Overview
//!
//! Each trait is a capability the core requires but that a host supplies in
//! its own way. Desktop implementations live in `bridge-desktop`; tests
//! implement the traits directly or mock them with `mockall`.
//!
//! ## Traits
//!
//! ### Storage engines
//! - [`DatabaseDriver`](database::DatabaseDriver) - Batched transactions over a synchronous or message-passed engine
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async GETs and streamed partition downloads
//!
//! ### Host state
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences that outlive a schema rebuild
//! - [`FavouritesStore`](favourites::FavouritesStore) - Authoritative favourite flags
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations convert their native errors into it with actionable
//! messages.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so one instance can be shared
//! across the orchestrator's concurrent imports.

pub mod database;
pub mod error;
pub mod favourites;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use database::{DatabaseDriver, QueryRow, QueryValue, Statement, TxMode};
pub use favourites::FavouritesStore;
pub use http::{DownloadStream, HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::SettingsStore;
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
