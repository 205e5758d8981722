use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema version mismatch: found {found:?}, expected {expected}")]
    SchemaMismatch { found: Option<i64>, expected: i64 },

    #[error("Song store is empty while {expected_languages} language(s) were expected")]
    EmptyStore { expected_languages: usize },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Invalid language partition: {0}")]
    InvalidPartition(String),

    #[error("Populate failed: {reason}")]
    PopulateFailed {
        reason: String,
        /// The caller should switch to the online backend
        fallback_advised: bool,
    },

    #[error("Remote catalog error: {0}")]
    Remote(String),

    #[error("Request superseded by a newer one")]
    Cancelled,
}

impl LibraryError {
    /// Errors that a destructive schema rebuild recovers from
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            LibraryError::SchemaMismatch { .. } | LibraryError::EmptyStore { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
