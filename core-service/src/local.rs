//! Local backend
//!
//! [`LocalSongDatabase`] serves the query contract from an embedded SQLite
//! store reached through either driver. Schema setup happens once, on the
//! first call that needs the store; populate and refresh go through the
//! [`SyncCoordinator`], and songs missing locally are repaired from the
//! remote catalog when the caller allows it.

use async_trait::async_trait;
use bridge_traits::database::DatabaseDriver;
use bridge_traits::favourites::FavouritesStore;
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::Clock;
use core_library::contract::{arrange, DatabaseCommon, ProgressFn, SongDatabase};
use core_library::models::{
    LanguageCounts, MetaFilter, MetaResult, SearchResult, Song, META_LANGUAGE,
};
use core_library::query::{QuerySpec, SongFilter};
use core_library::{PageRequest, Result, SchemaManager, SongRepository};
use core_runtime::StoreConfig;
use core_sync::{LanguageState, LastUpdateMap, RemoteCatalog, SyncConfig, SyncCoordinator};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Repository and coordinator, available once the schema is in place
struct Ready {
    repo: Arc<SongRepository>,
    coordinator: SyncCoordinator,
}

pub struct LocalSongDatabase {
    common: DatabaseCommon,
    driver: Arc<dyn DatabaseDriver>,
    catalog: Arc<dyn RemoteCatalog>,
    clock: Arc<dyn Clock>,
    sync_config: SyncConfig,
    ready: OnceCell<Ready>,
}

impl LocalSongDatabase {
    pub async fn new(
        driver: Arc<dyn DatabaseDriver>,
        catalog: Arc<dyn RemoteCatalog>,
        settings: Arc<dyn SettingsStore>,
        favourites: Arc<dyn FavouritesStore>,
        clock: Arc<dyn Clock>,
        sync_config: SyncConfig,
    ) -> Self {
        Self {
            common: DatabaseCommon::new(settings, favourites).await,
            driver,
            catalog,
            clock,
            sync_config,
            ready: OnceCell::new(),
        }
    }

    /// Build from a store configuration, taking bridges and tuning from it
    pub async fn from_config(
        driver: Arc<dyn DatabaseDriver>,
        catalog: Arc<dyn RemoteCatalog>,
        config: &StoreConfig,
    ) -> Self {
        Self::new(
            driver,
            catalog,
            Arc::clone(&config.settings_store),
            Arc::clone(&config.favourites),
            Arc::clone(&config.clock),
            SyncConfig::from(config),
        )
        .await
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    /// Per-language sync state; `Absent` until the store is opened
    pub fn language_state(&self, language: &str) -> LanguageState {
        self.ready
            .get()
            .map(|ready| ready.coordinator.language_state(language))
            .unwrap_or_default()
    }

    /// Re-import loaded languages whose partitions are older than the max age.
    pub async fn refresh_languages(&self, force: bool) -> Result<Vec<String>> {
        let ready = self.ready().await?;
        let refreshed = ready.coordinator.refresh_languages(force).await?;
        if !refreshed.is_empty() {
            self.common.bump_validity();
        }
        Ok(refreshed)
    }

    async fn ready(&self) -> Result<&Ready> {
        self.ready.get_or_try_init(|| self.open()).await
    }

    #[instrument(skip(self), fields(driver = self.driver.name()))]
    async fn open(&self) -> Result<Ready> {
        let settings = Arc::clone(self.common.settings());

        // Languages the last run finished importing; an empty songs table
        // despite these means the store was lost underneath us.
        let expected = LastUpdateMap::new(Arc::clone(&settings))
            .all()
            .await?
            .keys()
            .filter(|lang| lang.as_str() != META_LANGUAGE)
            .count();

        let state = SchemaManager::new(Arc::clone(&self.driver), Arc::clone(&settings))
            .initialize(expected)
            .await?;

        let repo = Arc::new(SongRepository::new(Arc::clone(&self.driver), state.caps));
        let coordinator = SyncCoordinator::new(
            Arc::clone(&repo),
            Arc::clone(&self.catalog),
            settings,
            Arc::clone(self.common.favourites()),
            Arc::clone(&self.clock),
            self.sync_config.clone(),
        );

        if state.rebuilt {
            // Everything is gone, meta included; the next populate reseeds.
            coordinator.reset().await?;
        }

        info!(rebuilt = state.rebuilt, fts = ?state.caps.fts, "Local song store ready");
        Ok(Ready { repo, coordinator })
    }

    async fn repair(&self, ready: &Ready, ids: &[i64]) -> Vec<Song> {
        match ready.coordinator.refresh_songs(ids).await {
            Ok(repaired) => {
                if repaired.stored > 0 {
                    self.common.bump_validity();
                }
                repaired.songs
            }
            Err(e) => {
                warn!(error = %e, count = ids.len(), "Song repair failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SongDatabase for LocalSongDatabase {
    fn common(&self) -> &DatabaseCommon {
        &self.common
    }

    async fn initialize(&self) -> Result<()> {
        self.ready().await?;
        self.common.mark_initialized();
        Ok(())
    }

    async fn populate(&self, background: bool, progress: Option<ProgressFn>) -> Result<()> {
        let ready = self.ready().await?;
        let report = ready.coordinator.populate_db(background, progress).await?;

        if !report.is_noop() {
            self.common.bump_validity();
        }
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Some languages could not be imported");
        }

        // Languages that were already in place may have gone stale
        match ready.coordinator.refresh_languages(false).await {
            Ok(refreshed) if !refreshed.is_empty() => {
                self.common.bump_validity();
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Stale language refresh failed"),
        }
        self.common.mark_populated();
        Ok(())
    }

    async fn search_meta(&self, filter: &MetaFilter) -> Result<MetaResult> {
        self.ready().await?.repo.search_meta(filter).await
    }

    async fn get_song(&self, id: i64, allow_repair: bool, want_export: bool) -> Result<Option<Song>> {
        if id <= 0 {
            return Ok(None);
        }
        let ready = self.ready().await?;

        let song = match ready.repo.get_song(id).await? {
            Some(song) => Some(song),
            None if allow_repair => self.repair(ready, &[id]).await.into_iter().next(),
            None => None,
        };

        Ok(song.map(|mut song| {
            if want_export {
                song.export = Some(song.export());
            }
            song
        }))
    }

    async fn fetch_songs(&self, ids: &[i64], allow_repair: bool) -> Result<Vec<Song>> {
        let ready = self.ready().await?;
        let mut songs = ready.repo.get_songs_by_ids(ids).await?;

        if allow_repair && songs.len() < ids.len() {
            let found: HashSet<i64> = songs.iter().map(|s| s.id).collect();
            let missing: Vec<i64> = ids.iter().copied().filter(|id| !found.contains(id)).collect();
            debug!(missing = missing.len(), "Repairing songs absent locally");
            songs.extend(self.repair(ready, &missing).await);
        }

        Ok(songs)
    }

    async fn run_search(&self, filter: &SongFilter, page: PageRequest) -> Result<SearchResult> {
        let ready = self.ready().await?;
        let spec = QuerySpec::compile(filter, &ready.repo.capabilities());
        let ids = ready.repo.search_ids(&spec, page).await?;

        // Only an empty first page means nothing matched locally
        if ids.is_empty() && !spec.fetch_ids.is_empty() && page.offset() == 0 {
            let repaired = self.repair(ready, &spec.fetch_ids).await;
            let data = arrange(&spec.fetch_ids, repaired, false);
            return Ok(SearchResult {
                total: Some(data.len() as u64),
                data,
            });
        }

        let songs = ready.repo.get_songs_by_ids(&ids).await?;
        Ok(SearchResult {
            data: arrange(&ids, songs, false),
            total: None,
        })
    }

    async fn get_total(&self, filter: &SongFilter) -> Result<u64> {
        let ready = self.ready().await?;
        let spec = QuerySpec::compile(filter, &ready.repo.capabilities());
        ready.repo.count(&spec).await
    }

    async fn set_favourite(&self, id: i64, favourite: bool) -> Result<()> {
        let changed = self.ready().await?.repo.set_favourite(id, favourite).await?;
        if changed {
            self.common.bump_validity();
        }
        Ok(())
    }

    async fn loaded_languages(&self) -> Result<LanguageCounts> {
        Ok(self.ready().await?.coordinator.loaded_languages().await?)
    }
}
