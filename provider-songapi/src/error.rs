//! Error types for the song API client

use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use core_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// API request returned an error status
    #[error("Song API error (status {status_code}): {message}")]
    Api { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// A newer request took over the query slot
    #[error("Request superseded by a newer one")]
    Cancelled,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::ParseError(error.to_string())
    }
}

impl From<ApiError> for LibraryError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Cancelled => LibraryError::Cancelled,
            ApiError::Bridge(e) => LibraryError::Bridge(e),
            other => LibraryError::Remote(other.to_string()),
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Cancelled => SyncError::Cancelled,
            ApiError::Bridge(e) => SyncError::Bridge(e),
            other => SyncError::Remote(other.to_string()),
        }
    }
}
