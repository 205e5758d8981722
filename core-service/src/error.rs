use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Song API error: {0}")]
    Api(#[from] provider_songapi::ApiError),
}

impl CoreError {
    /// The local store gave up and the online backend should serve instead
    pub fn advises_fallback(&self) -> bool {
        match self {
            CoreError::Sync(e) => e.advises_fallback(),
            CoreError::Library(core_library::LibraryError::PopulateFailed {
                fallback_advised, ..
            }) => *fallback_advised,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
