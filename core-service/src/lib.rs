//! Song store façade and bootstrap helpers.
//!
//! This crate wires the configured bridges, the embedded store and the
//! remote catalog into one [`SongDatabase`]. Desktop hosts enable the
//! `desktop-shims` feature so [`StoreConfig`] can supply default bridges from
//! `bridge-desktop`; embedded hosts inject their own.
//!
//! ```ignore
//! use core_service::{open_song_database, populate_or_fallback, StoreConfig};
//!
//! let config = StoreConfig::builder()
//!     .database_path("/var/lib/songbook/songs.db")
//!     .api_base_url("https://songs.example.com/api")
//!     .languages(["en", "tr"])
//!     .build()
//!     .await?;
//! let db = open_song_database(&config).await?;
//! let db = populate_or_fallback(db, &config, false, None).await?;
//! ```

pub mod bootstrap;
pub mod error;
pub mod local;

pub use bootstrap::{open_song_database, populate_or_fallback};
pub use error::{CoreError, Result};
pub use local::LocalSongDatabase;

pub use core_library::{
    Page, PageRequest, SearchResult, Song, SongDatabase, SongFilter, SortOrder,
};
pub use core_runtime::{DriverKind, StoreConfig};
pub use provider_songapi::OnlineSongDatabase;
