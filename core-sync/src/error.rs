use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Language {language} failed to import: {reason}")]
    LanguageFailed { language: String, reason: String },

    #[error("{failed} of {requested} languages failed to import")]
    TooManyFailures { failed: usize, requested: usize },

    #[error("Invalid language partition for {language}: {reason}")]
    InvalidPartition { language: String, reason: String },

    #[error("Invalid state transition for {language} from {from} to {to}")]
    InvalidStateTransition {
        language: String,
        from: String,
        to: String,
    },

    #[error("Remote catalog error: {0}")]
    Remote(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// The failure is large enough that the caller should stop using the local store
    pub fn advises_fallback(&self) -> bool {
        matches!(self, SyncError::TooManyFailures { .. })
    }
}

impl From<SyncError> for LibraryError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Library(e) => e,
            SyncError::Bridge(e) => LibraryError::Bridge(e),
            SyncError::Remote(reason) => LibraryError::Remote(reason),
            SyncError::Cancelled => LibraryError::Cancelled,
            SyncError::InvalidPartition { language, reason } => {
                LibraryError::InvalidPartition(format!("{}: {}", language, reason))
            }
            other => LibraryError::PopulateFailed {
                fallback_advised: other.advises_fallback(),
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
