//! [`RemoteCatalog`] over the song API

use async_trait::async_trait;
use bytes::Bytes;
use core_library::models::Song;
use core_sync::{DownloadProgress, LanguageIndex, RemoteCatalog};

use crate::client::SongApiClient;

#[async_trait]
impl RemoteCatalog for SongApiClient {
    async fn language_index(&self) -> core_sync::Result<LanguageIndex> {
        Ok(self
            .language_packs()
            .await?
            .into_iter()
            .map(|pack| (pack.lang, pack.songs))
            .collect())
    }

    async fn download_partition(
        &self,
        language: &str,
        progress: DownloadProgress<'_>,
    ) -> core_sync::Result<Bytes> {
        Ok(self.download_language_pack(language, progress).await?)
    }

    async fn fetch_songs(&self, ids: &[i64]) -> core_sync::Result<Vec<Song>> {
        Ok(self.get_songs(ids).await?)
    }
}
