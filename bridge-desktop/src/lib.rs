//! Desktop implementations of the host bridge traits
//!
//! - [`ReqwestHttpClient`]: JSON calls and streamed partition downloads
//! - [`SqliteSettingsStore`]: settings in a SQLite file next to the song database
//! - [`MemoryFavouritesStore`]: favourite ids held in memory
//!
//! ```ignore
//! use bridge_desktop::{default_data_dir, ReqwestHttpClient, SqliteSettingsStore};
//!
//! let http = ReqwestHttpClient::new()?;
//! let settings = SqliteSettingsStore::new(default_data_dir().join("settings.db")).await?;
//! ```

mod favourites;
mod http;
mod settings;

pub use favourites::MemoryFavouritesStore;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;

use std::path::PathBuf;

/// Per-user data directory for the song store, falling back to the working directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("songbook"))
        .unwrap_or_else(|| PathBuf::from("."))
}
