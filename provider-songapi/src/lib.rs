//! # Song API Provider
//!
//! HTTP client for the remote song service and the two roles it plays in
//! the store:
//!
//! - [`SongApiClient`] as a [`core_sync::RemoteCatalog`]: language index,
//!   streamed language-pack downloads and bulk song fetches for repair.
//! - [`OnlineSongDatabase`]: a full [`core_library::SongDatabase`] backend
//!   that answers every query remotely, used when no local store is
//!   available or a populate run failed badly.
//!
//! All traffic goes through the [`bridge_traits::HttpClient`] bridge. Search
//! and count requests each occupy a slot; a newer request in the same slot
//! cancels the older one in flight.

pub mod catalog;
pub mod client;
pub mod error;
pub mod online;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{filter_params, QuerySlot, SongApiClient, MAX_IDS_PER_REQUEST};
pub use error::{ApiError, Result};
pub use online::OnlineSongDatabase;
pub use types::{LanguagePack, SongsResponse};
