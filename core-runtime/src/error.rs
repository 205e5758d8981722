//! Failures while assembling a [`StoreConfig`](crate::StoreConfig) or
//! installing the logging subscriber

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No bridge was injected and the platform has no default for it
    #[error("no {capability} available: {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A platform default bridge was available but failed to start
    #[error("default bridge failed to start: {0}")]
    DefaultBridge(String),
}

pub type Result<T> = std::result::Result<T, Error>;
