//! Online backend
//!
//! Serves the whole query contract from the remote API. Nothing is stored
//! locally, so `populate` has nothing to download and no language is ever
//! reported as loaded.

use async_trait::async_trait;
use bridge_traits::favourites::FavouritesStore;
use bridge_traits::storage::SettingsStore;
use core_library::contract::{DatabaseCommon, ProgressFn, SongDatabase};
use core_library::models::{LanguageCounts, MetaFilter, MetaResult, SearchResult, Song};
use core_library::query::SongFilter;
use core_library::{PageRequest, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::SongApiClient;

pub struct OnlineSongDatabase {
    client: Arc<SongApiClient>,
    common: DatabaseCommon,
}

impl OnlineSongDatabase {
    pub async fn new(
        client: Arc<SongApiClient>,
        settings: Arc<dyn SettingsStore>,
        favourites: Arc<dyn FavouritesStore>,
    ) -> Self {
        Self {
            client,
            common: DatabaseCommon::new(settings, favourites).await,
        }
    }

    pub fn client(&self) -> &Arc<SongApiClient> {
        &self.client
    }

    fn mark_favourites(&self, songs: &mut [Song]) {
        let favourites = self.common.favourites().get_favourites();
        for song in songs {
            song.favourite = favourites.contains(&song.id);
        }
    }

    /// The service has no notion of this user's favourites, so a favourites
    /// filter is sent as an id search over the local set instead. `None`
    /// means there are no favourites and nothing can match.
    fn resolve_favourites(&self, filter: &SongFilter) -> Option<SongFilter> {
        if filter.favourite != Some(true) {
            return Some(filter.clone());
        }

        let mut ids: Vec<i64> = self
            .common
            .favourites()
            .get_favourites()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return None;
        }
        ids.sort_unstable();

        let search = ids
            .iter()
            .map(|id| format!("i{}", id))
            .collect::<Vec<_>>()
            .join(", ");
        Some(SongFilter {
            search,
            favourite: None,
            ..filter.clone()
        })
    }
}

#[async_trait]
impl SongDatabase for OnlineSongDatabase {
    fn common(&self) -> &DatabaseCommon {
        &self.common
    }

    async fn initialize(&self) -> Result<()> {
        info!(base_url = self.client.base_url(), "Using online song backend");
        self.common.mark_initialized();
        Ok(())
    }

    async fn populate(&self, _background: bool, progress: Option<ProgressFn>) -> Result<()> {
        if let Some(progress) = progress {
            progress(1.0);
        }
        self.common.mark_populated();
        Ok(())
    }

    async fn search_meta(&self, filter: &MetaFilter) -> Result<MetaResult> {
        Ok(self.client.search_meta(filter).await?)
    }

    async fn get_song(&self, id: i64, _allow_repair: bool, want_export: bool) -> Result<Option<Song>> {
        let Some(mut song) = self.client.get_song(id).await? else {
            return Ok(None);
        };
        self.mark_favourites(std::slice::from_mut(&mut song));
        if want_export {
            song.export = Some(song.export());
        }
        Ok(Some(song))
    }

    async fn fetch_songs(&self, ids: &[i64], _allow_repair: bool) -> Result<Vec<Song>> {
        let mut songs = self.client.get_songs(ids).await?;
        self.mark_favourites(&mut songs);
        Ok(songs)
    }

    async fn run_search(&self, filter: &SongFilter, page: PageRequest) -> Result<SearchResult> {
        let Some(filter) = self.resolve_favourites(filter) else {
            return Ok(SearchResult {
                data: Vec::new(),
                total: Some(0),
            });
        };

        let mut result = self.client.run_search(&filter, page).await?;
        self.mark_favourites(&mut result.data);
        Ok(result)
    }

    async fn get_total(&self, filter: &SongFilter) -> Result<u64> {
        match self.resolve_favourites(filter) {
            Some(filter) => Ok(self.client.get_total(&filter).await?),
            None => Ok(0),
        }
    }

    async fn set_favourite(&self, id: i64, favourite: bool) -> Result<()> {
        debug!(id, favourite, "Favourite changed");
        self.common.bump_validity();
        Ok(())
    }

    async fn loaded_languages(&self) -> Result<LanguageCounts> {
        Ok(LanguageCounts::new())
    }
}
