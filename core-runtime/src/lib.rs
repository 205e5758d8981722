//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the song store:
//! - Logging and tracing infrastructure
//! - Configuration management
//!
//! ## Overview
//!
//! Every other core crate receives its bridges and tuning through
//! [`StoreConfig`](config::StoreConfig) and logs through `tracing`, which
//! [`init_logging`](logging::init_logging) wires to stdout and the host's
//! `LoggerSink`.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{DriverKind, StoreConfig, StoreConfigBuilder};
pub use error::{Error, Result};
