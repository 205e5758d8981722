//! Remote catalog contract
//!
//! The orchestrator needs three things from the network side: how large each
//! language partition is, the partition bodies themselves, and individual
//! songs for repair. The online API client implements this trait.

use async_trait::async_trait;
use bytes::Bytes;
use core_library::models::Song;
use std::collections::BTreeMap;

use crate::Result;

/// Language code mapped to its expected song count
pub type LanguageIndex = BTreeMap<String, u64>;

/// Byte-level download progress in `0.0..=1.0`
pub type DownloadProgress<'a> = &'a (dyn Fn(f64) + Send + Sync);

#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Languages the catalog offers, with their song counts
    async fn language_index(&self) -> Result<LanguageIndex>;

    /// Download the raw partition body of `language`.
    async fn download_partition(&self, language: &str, progress: DownloadProgress<'_>) -> Result<Bytes>;

    /// Fetch individual songs by id, in any language
    async fn fetch_songs(&self, ids: &[i64]) -> Result<Vec<Song>>;
}
