//! # Sync Coordinator
//!
//! Keeps the local store's language partitions in line with the configured
//! language list and the remote catalog.
//!
//! ## Workflow
//!
//! ### Populate
//! 1. Read the languages present in the store
//! 2. `to_add = desired - loaded`, `to_remove = loaded - desired`
//! 3. Order additions largest-first by the catalog's song counts
//! 4. Run removals and additions concurrently; additions are downloaded with
//!    bounded parallelism (one at a time in the background)
//! 5. Fail if a required language failed, or if more than the configured
//!    fraction of requested languages failed
//!
//! ### Language import
//! 1. Download the partition body, reporting byte progress
//! 2. Diff locally present ids against the incoming ids and delete the stale ones
//! 3. Upsert the rest in bounded batches, yielding between batches, or in a
//!    single bulk message when the driver supports it
//! 4. Record the import time in the last-update map
//!
//! Removing a language imports an empty partition for it and then clears its
//! timestamp.
//!
//! ### Refresh
//! Every loaded language plus the `meta` partition is re-imported once its
//! timestamp is older than `max_age`, or unconditionally when forced.

use crate::{
    catalog::{LanguageIndex, RemoteCatalog},
    last_update::LastUpdateMap,
    partition::{parse_partition, Partition},
    progress::ProgressTracker,
    state::{LanguageState, LanguageStates},
    Result, SyncError,
};
use bridge_traits::storage::SettingsStore;
use bridge_traits::{Clock, FavouritesStore};
use core_library::contract::normalize_ids;
use core_library::models::{LanguageCounts, Song, META_LANGUAGE};
use core_library::{ProgressFn, SongRepository};
use core_runtime::config::{
    StoreConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_FOREGROUND_CONCURRENCY,
    DEFAULT_IMPORT_BATCH_SIZE, DEFAULT_MAX_AGE,
};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Sync coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Languages the store should hold
    pub languages: Vec<String>,

    /// Languages whose failure fails the whole populate
    pub required_languages: Vec<String>,

    /// Age after which a partition is refreshed
    pub max_age: Duration,

    /// Parallel downloads when populating in the foreground
    pub foreground_concurrency: usize,

    /// Songs per write transaction
    pub import_batch_size: usize,

    /// Failed fraction of requested languages above which populate fails
    pub failure_threshold: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            required_languages: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            foreground_concurrency: DEFAULT_FOREGROUND_CONCURRENCY,
            import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl From<&StoreConfig> for SyncConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            languages: config.languages.clone(),
            required_languages: config.required_languages.clone(),
            max_age: config.max_age,
            foreground_concurrency: config.foreground_concurrency,
            import_batch_size: config.import_batch_size,
            failure_threshold: config.failure_threshold,
        }
    }
}

/// Outcome of [`SyncCoordinator::populate_db`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Languages that failed but were tolerated
    pub failed: Vec<String>,
}

impl PopulateReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Songs returned by [`SyncCoordinator::refresh_songs`]
#[derive(Debug, Clone, Default)]
pub struct Repaired {
    pub songs: Vec<Song>,
    /// Rows written back to the store
    pub stored: usize,
}

pub struct SyncCoordinator {
    repo: Arc<SongRepository>,
    catalog: Arc<dyn RemoteCatalog>,
    favourites: Arc<dyn FavouritesStore>,
    clock: Arc<dyn Clock>,
    last_update: LastUpdateMap,
    states: LanguageStates,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        repo: Arc<SongRepository>,
        catalog: Arc<dyn RemoteCatalog>,
        settings: Arc<dyn SettingsStore>,
        favourites: Arc<dyn FavouritesStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            repo,
            catalog,
            favourites,
            clock,
            last_update: LastUpdateMap::new(settings),
            states: LanguageStates::new(),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn language_state(&self, language: &str) -> LanguageState {
        self.states.get(language)
    }

    pub fn last_update(&self) -> &LastUpdateMap {
        &self.last_update
    }

    /// Song counts per language currently in the store
    pub async fn loaded_languages(&self) -> Result<LanguageCounts> {
        let counts = self.repo.loaded_languages().await?;
        self.states.mark_present(counts.keys().cloned());
        Ok(counts)
    }

    /// Forget timestamps and states after the schema was rebuilt
    pub async fn reset(&self) -> Result<()> {
        self.last_update.reset().await?;
        self.states.reset();
        info!("Sync state reset");
        Ok(())
    }

    /// Bring the store's languages in line with [`SyncConfig::languages`].
    #[instrument(skip(self, progress))]
    pub async fn populate_db(
        &self,
        background: bool,
        progress: Option<ProgressFn>,
    ) -> Result<PopulateReport> {
        let loaded = self.loaded_languages().await?;
        let desired: HashSet<&str> = self.config.languages.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        let mut to_add: Vec<String> = self
            .config
            .languages
            .iter()
            .filter(|l| !loaded.contains_key(l.as_str()) && seen.insert(l.as_str()))
            .cloned()
            .collect();
        let to_remove: Vec<String> = loaded
            .keys()
            .filter(|l| !desired.contains(l.as_str()))
            .cloned()
            .collect();
        let meta_due = self.last_update.get(META_LANGUAGE).await?.is_none();

        if to_add.is_empty() && to_remove.is_empty() && !meta_due {
            debug!("Store already holds the desired languages");
            if let Some(progress) = &progress {
                progress(1.0);
            }
            return Ok(PopulateReport::default());
        }

        let index = if to_add.is_empty() {
            LanguageIndex::new()
        } else {
            match self.catalog.language_index().await {
                Ok(index) => index,
                Err(e) => {
                    warn!(error = %e, "Language index unavailable, weighting languages equally");
                    LanguageIndex::new()
                }
            }
        };
        let expected = |language: &str| index.get(language).copied().unwrap_or(0);

        to_add.sort_by_key(|l| Reverse(expected(l.as_str())));
        let requested = to_add.len() + to_remove.len();
        if meta_due {
            to_add.push(META_LANGUAGE.to_string());
        }

        let concurrency = if background {
            1
        } else {
            self.config.foreground_concurrency.max(1)
        };
        info!(
            add = ?to_add,
            remove = ?to_remove,
            concurrency,
            "Populating song store"
        );

        let tracker = ProgressTracker::new(
            to_add.iter().map(|l| (l.clone(), expected(l.as_str()))),
            progress.clone(),
        );
        let tracker = &tracker;

        let additions = stream::iter(to_add.clone())
            .map(|language| async move {
                let result = self.sync_language(&language, tracker).await;
                tracker.finish(&language);
                (language, result)
            })
            .boxed()
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>();
        let removals = join_all(to_remove.iter().map(|language| async move {
            (language.clone(), self.remove_language(language).await.map(|_| 0))
        }));

        let (added, removed) = futures::join!(additions, removals);

        let mut report = PopulateReport::default();
        let mut required_failure = None;
        for (language, result, removal) in added
            .into_iter()
            .map(|(l, r)| (l, r, false))
            .chain(removed.into_iter().map(|(l, r)| (l, r, true)))
        {
            match result {
                Ok(_) if removal => report.removed.push(language),
                Ok(_) => {
                    if language != META_LANGUAGE {
                        report.added.push(language);
                    }
                }
                Err(e) => {
                    warn!(language = %language, error = %e, "Language sync failed");
                    if required_failure.is_none() && self.config.required_languages.contains(&language) {
                        required_failure = Some(SyncError::LanguageFailed {
                            language: language.clone(),
                            reason: e.to_string(),
                        });
                    }
                    if language != META_LANGUAGE {
                        report.failed.push(language);
                    }
                }
            }
        }

        if requested > 0
            && report.failed.len() as f64 / requested as f64 > self.config.failure_threshold
        {
            error!(
                failed = report.failed.len(),
                requested,
                "Too many languages failed to import"
            );
            return Err(SyncError::TooManyFailures {
                failed: report.failed.len(),
                requested,
            });
        }
        if let Some(err) = required_failure {
            return Err(err);
        }

        if let Some(progress) = &progress {
            progress(1.0);
        }
        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Populate complete"
        );
        Ok(report)
    }

    /// Download and import one language partition.
    #[instrument(skip(self))]
    pub async fn import_language(&self, language: &str) -> Result<usize> {
        let tracker = ProgressTracker::new(Vec::<(String, u64)>::new(), None);
        self.sync_language(language, &tracker).await
    }

    /// Remove every song of `language` and forget its timestamp.
    #[instrument(skip(self))]
    pub async fn remove_language(&self, language: &str) -> Result<()> {
        if self.states.get(language) == LanguageState::Absent
            && !self.repo.language_song_ids(language).await?.is_empty()
        {
            self.states.mark_present([language]);
        }
        self.states.transition(language, LanguageState::Removing)?;

        let result = async {
            self.import_songs(language, &[], &|_: f64| {}).await?;
            self.last_update.clear(language).await
        }
        .await;

        let next = match &result {
            Ok(()) => {
                info!(language, "Language removed");
                LanguageState::Absent
            }
            Err(_) => LanguageState::Present,
        };
        self.settle(language, next);
        result
    }

    /// Re-import languages whose partition is older than `max_age`.
    ///
    /// Returns the languages that were refreshed. Individual failures are
    /// logged and leave the previous data in place.
    #[instrument(skip(self))]
    pub async fn refresh_languages(&self, force: bool) -> Result<Vec<String>> {
        let loaded = self.loaded_languages().await?;
        let stamps = self.last_update.all().await?;
        let now = self.clock.unix_timestamp();
        let max_age = self.config.max_age.as_secs() as i64;

        let due: Vec<String> = loaded
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(META_LANGUAGE))
            .filter(|l| force || stamps.get(*l).map_or(true, |ts| now - ts > max_age))
            .map(str::to_string)
            .collect();

        if due.is_empty() {
            debug!("No language is due for refresh");
            return Ok(Vec::new());
        }
        info!(languages = ?due, "Refreshing languages");

        let tracker = ProgressTracker::new(Vec::<(String, u64)>::new(), None);
        let mut refreshed = Vec::with_capacity(due.len());
        for language in due {
            match self.sync_language(&language, &tracker).await {
                Ok(_) => refreshed.push(language),
                Err(e) => warn!(language = %language, error = %e, "Refresh failed"),
            }
        }
        Ok(refreshed)
    }

    /// Repair-fetch one song; `None` when the catalog cannot supply it.
    pub async fn refresh_song(&self, id: i64) -> Result<Option<Song>> {
        Ok(self.refresh_songs(&[id]).await?.songs.into_iter().next())
    }

    /// Repair-fetch songs from the catalog.
    ///
    /// Songs of languages present locally are written back to the store.
    /// Songs of other languages are returned without being stored, so they
    /// never make a language look loaded. Fetch failures yield an empty list.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn refresh_songs(&self, ids: &[i64]) -> Result<Repaired> {
        let ids = normalize_ids(ids);
        if ids.is_empty() {
            return Ok(Repaired::default());
        }

        let mut songs = match self.catalog.fetch_songs(&ids).await {
            Ok(songs) => songs,
            Err(e) => {
                warn!(error = %e, "Repair fetch failed");
                return Ok(Repaired::default());
            }
        };

        let favourites = self.favourites.get_favourites();
        for song in &mut songs {
            song.favourite = favourites.contains(&song.id);
        }

        let storable: Vec<Song> = songs
            .iter()
            .filter(|s| self.states.get(&s.lang) == LanguageState::Present)
            .cloned()
            .collect();
        let mut stored = 0;
        if !storable.is_empty() {
            match self.repo.import_batch(&storable, &favourites).await {
                Ok(()) => {
                    stored = storable.len();
                    debug!(stored, "Repaired songs written back");
                }
                Err(e) => warn!(error = %e, "Could not store repaired songs"),
            }
        }

        Ok(Repaired { songs, stored })
    }

    async fn sync_language(&self, language: &str, tracker: &ProgressTracker) -> Result<usize> {
        let previous = self.states.transition(language, LanguageState::Downloading)?;

        match self.download_and_import(language, tracker).await {
            Ok(rows) => {
                let next = if rows == 0 && language != META_LANGUAGE {
                    LanguageState::Absent
                } else {
                    LanguageState::Present
                };
                self.settle(language, next);
                Ok(rows)
            }
            Err(e) => {
                if previous != LanguageState::Present {
                    self.discard_partial(language).await;
                }
                self.settle(language, previous);
                Err(e)
            }
        }
    }

    async fn download_and_import(&self, language: &str, tracker: &ProgressTracker) -> Result<usize> {
        let body = self
            .catalog
            .download_partition(language, &|f: f64| tracker.downloaded(language, f))
            .await?;
        tracker.downloaded(language, 1.0);
        debug!(language, bytes = body.len(), "Partition downloaded");

        self.states.transition(language, LanguageState::Importing)?;
        let rows = match parse_partition(language, &body)? {
            Partition::Songs(songs) => {
                self.import_songs(language, &songs, &|f: f64| tracker.imported(language, f))
                    .await?
            }
            Partition::Meta { sources, albums } => {
                self.repo.replace_meta(&sources, &albums).await?;
                tracker.imported(language, 1.0);
                sources.len() + albums.len()
            }
        };

        if rows == 0 && language != META_LANGUAGE {
            self.last_update.clear(language).await?;
        } else {
            self.last_update
                .touch(language, self.clock.unix_timestamp())
                .await?;
        }
        info!(language, rows, "Language imported");
        Ok(rows)
    }

    /// Make the stored rows of `language` exactly `songs`.
    async fn import_songs(
        &self,
        language: &str,
        songs: &[Song],
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<usize> {
        let existing = self.repo.language_song_ids(language).await?;
        let incoming: HashSet<i64> = songs.iter().map(|s| s.id).collect();
        let stale: Vec<i64> = existing.difference(&incoming).copied().collect();
        if !stale.is_empty() {
            debug!(language, stale = stale.len(), "Deleting songs no longer in partition");
            self.repo.delete_songs(&stale).await?;
        }

        if songs.is_empty() {
            progress(1.0);
            return Ok(0);
        }

        let favourites = self.favourites.get_favourites();
        if self.repo.driver().supports_bulk_insert() {
            self.repo.bulk_import(songs, &favourites).await?;
        } else {
            let batch_size = self.config.import_batch_size.max(1);
            let mut written = 0;
            for batch in songs.chunks(batch_size) {
                self.repo.import_batch(batch, &favourites).await?;
                written += batch.len();
                progress(written as f64 / songs.len() as f64);
                tokio::task::yield_now().await;
            }
        }

        progress(1.0);
        Ok(songs.len())
    }

    /// Drop rows left behind by an interrupted first import
    async fn discard_partial(&self, language: &str) {
        let cleanup = async {
            let ids: Vec<i64> = self
                .repo
                .language_song_ids(language)
                .await?
                .into_iter()
                .collect();
            if !ids.is_empty() {
                self.repo.delete_songs(&ids).await?;
            }
            Ok::<_, SyncError>(ids.len())
        };
        match cleanup.await {
            Ok(0) => {}
            Ok(rows) => debug!(language, rows, "Discarded partial import"),
            Err(e) => warn!(language, error = %e, "Could not discard partial import"),
        }
    }

    fn settle(&self, language: &str, next: LanguageState) {
        if let Err(e) = self.states.transition(language, next) {
            warn!(language, error = %e, "Unexpected language state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::{MemoryFavouritesStore, SqliteSettingsStore};
    use bridge_traits::FixedClock;
    use bytes::Bytes;
    use chrono::DateTime;
    use core_library::adapters::SqliteSyncDriver;
    use core_library::models::MetaFilter;
    use core_library::SchemaManager;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCatalog {
        partitions: Mutex<HashMap<String, Value>>,
        failing: HashSet<String>,
        songs: HashMap<i64, Song>,
        downloads: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn with(self, language: &str, ids: std::ops::RangeInclusive<i64>) -> Self {
            self.set(language, ids);
            self
        }

        fn failing(mut self, language: &str) -> Self {
            self.failing.insert(language.to_string());
            self
        }

        fn set(&self, language: &str, ids: std::ops::RangeInclusive<i64>) {
            let data: Vec<Value> = ids
                .map(|id| json!({"id": id, "lang": language, "title": format!("{} {}", language, id), "songxml": ""}))
                .collect();
            self.partitions
                .lock()
                .unwrap()
                .insert(language.to_string(), json!({ "data": data }));
        }

        fn downloads(&self) -> Vec<String> {
            self.downloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteCatalog for FakeCatalog {
        async fn language_index(&self) -> Result<LanguageIndex> {
            Ok(self
                .partitions
                .lock()
                .unwrap()
                .iter()
                .map(|(l, p)| (l.clone(), p["data"].as_array().map_or(0, |d| d.len() as u64)))
                .collect())
        }

        async fn download_partition(
            &self,
            language: &str,
            progress: crate::catalog::DownloadProgress<'_>,
        ) -> Result<Bytes> {
            self.downloads.lock().unwrap().push(language.to_string());
            if self.failing.contains(language) {
                return Err(SyncError::Remote(format!("{} unavailable", language)));
            }
            let body = if language == META_LANGUAGE {
                json!({"song_source_info": [{"id": 1, "name": "Hymnal"}], "albums": []})
            } else {
                self.partitions
                    .lock()
                    .unwrap()
                    .get(language)
                    .cloned()
                    .unwrap_or_else(|| json!({ "data": [] }))
            };
            progress(0.5);
            Ok(Bytes::from(serde_json::to_vec(&body).unwrap()))
        }

        async fn fetch_songs(&self, ids: &[i64]) -> Result<Vec<Song>> {
            if self.failing.contains("fetch") {
                return Err(SyncError::Remote("offline".into()));
            }
            Ok(ids.iter().filter_map(|id| self.songs.get(id).cloned()).collect())
        }
    }

    struct Fixture {
        repo: Arc<SongRepository>,
        settings: Arc<SqliteSettingsStore>,
        clock: Arc<FixedClock>,
    }

    impl Fixture {
        async fn new() -> Self {
            let driver = Arc::new(SqliteSyncDriver::open_in_memory().unwrap());
            let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
            let state = SchemaManager::new(driver.clone(), settings.clone())
                .initialize(0)
                .await
                .unwrap();
            Self {
                repo: Arc::new(SongRepository::new(driver, state.caps)),
                settings,
                clock: Arc::new(FixedClock::new(
                    DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                )),
            }
        }

        fn coordinator(&self, catalog: Arc<FakeCatalog>, languages: &[&str]) -> SyncCoordinator {
            self.coordinator_with(
                catalog,
                SyncConfig {
                    languages: languages.iter().map(|l| l.to_string()).collect(),
                    import_batch_size: 7,
                    ..Default::default()
                },
            )
        }

        fn coordinator_with(&self, catalog: Arc<FakeCatalog>, config: SyncConfig) -> SyncCoordinator {
            SyncCoordinator::new(
                Arc::clone(&self.repo),
                catalog,
                self.settings.clone(),
                Arc::new(MemoryFavouritesStore::with_ids([3])),
                self.clock.clone(),
                config,
            )
        }
    }

    #[tokio::test]
    async fn test_populate_imports_largest_first_in_background() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(FakeCatalog::default().with("tr", 1001..=1010).with("en", 1..=30));
        let coordinator = fixture.coordinator(catalog.clone(), &["tr", "en"]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |f| sink_seen.lock().unwrap().push(f));

        let report = coordinator.populate_db(true, Some(progress)).await.unwrap();

        assert_eq!(catalog.downloads(), vec!["en", "tr", META_LANGUAGE]);
        assert_eq!(report.added, vec!["en", "tr"]);
        let loaded = coordinator.loaded_languages().await.unwrap();
        assert_eq!(loaded.get("en"), Some(&30));
        assert_eq!(loaded.get("tr"), Some(&10));
        assert_eq!(coordinator.language_state("en"), LanguageState::Present);

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));

        let meta = fixture.repo.search_meta(&MetaFilter::new("hym")).await.unwrap();
        assert_eq!(meta.sources.len(), 1);
        assert!(fixture.repo.get_song(3).await.unwrap().unwrap().favourite);
    }

    #[tokio::test]
    async fn test_populate_removes_undesired_languages() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(FakeCatalog::default().with("en", 1..=5).with("tr", 6..=9));
        fixture
            .coordinator(catalog.clone(), &["en", "tr"])
            .populate_db(false, None)
            .await
            .unwrap();

        let coordinator = fixture.coordinator(catalog, &["en"]);
        let report = coordinator.populate_db(false, None).await.unwrap();

        assert_eq!(report.removed, vec!["tr"]);
        assert!(report.added.is_empty());
        let loaded = coordinator.loaded_languages().await.unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["en"]);
        assert_eq!(coordinator.last_update().get("tr").await.unwrap(), None);
        assert_eq!(coordinator.language_state("tr"), LanguageState::Absent);

        assert!(coordinator.populate_db(false, None).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_reimport_deletes_only_stale_ids() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(FakeCatalog::default().with("en", 1..=10));
        let coordinator = fixture.coordinator(catalog.clone(), &["en"]);
        coordinator.import_language("en").await.unwrap();

        catalog.set("en", 5..=12);
        assert_eq!(coordinator.import_language("en").await.unwrap(), 8);

        let mut ids: Vec<i64> = fixture.repo.language_song_ids("en").await.unwrap().into_iter().collect();
        ids.sort();
        assert_eq!(ids, (5..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_partition_removes_language() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(FakeCatalog::default().with("en", 1..=4));
        let coordinator = fixture.coordinator(catalog.clone(), &["en"]);
        coordinator.import_language("en").await.unwrap();

        catalog.partitions.lock().unwrap().insert("en".into(), json!({"data": []}));
        assert_eq!(coordinator.import_language("en").await.unwrap(), 0);

        assert!(coordinator.loaded_languages().await.unwrap().is_empty());
        assert_eq!(coordinator.language_state("en"), LanguageState::Absent);
    }

    #[tokio::test]
    async fn test_tolerated_failure_is_reported() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(
            FakeCatalog::default()
                .with("en", 1..=3)
                .with("tr", 4..=6)
                .with("fr", 7..=9)
                .failing("de"),
        );
        let coordinator = fixture.coordinator(catalog, &["en", "tr", "fr", "de"]);

        let report = coordinator.populate_db(false, None).await.unwrap();

        assert_eq!(report.failed, vec!["de"]);
        assert_eq!(report.added.len(), 3);
        assert_eq!(coordinator.language_state("de"), LanguageState::Absent);
    }

    #[tokio::test]
    async fn test_too_many_failures() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(
            FakeCatalog::default()
                .with("en", 1..=3)
                .with("tr", 4..=6)
                .failing("de")
                .failing("fr"),
        );
        let coordinator = fixture.coordinator(catalog, &["en", "tr", "fr", "de"]);

        let err = coordinator.populate_db(false, None).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::TooManyFailures {
                failed: 2,
                requested: 4
            }
        ));
        assert!(err.advises_fallback());
    }

    #[tokio::test]
    async fn test_required_language_failure_propagates() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(
            FakeCatalog::default()
                .with("en", 1..=3)
                .with("tr", 4..=6)
                .with("fr", 7..=9)
                .failing("de"),
        );
        let coordinator = fixture.coordinator_with(
            catalog,
            SyncConfig {
                languages: vec!["en".into(), "tr".into(), "fr".into(), "de".into()],
                required_languages: vec!["de".into()],
                ..Default::default()
            },
        );

        let err = coordinator.populate_db(false, None).await.unwrap_err();
        assert!(matches!(err, SyncError::LanguageFailed { ref language, .. } if language == "de"));
    }

    #[tokio::test]
    async fn test_refresh_respects_max_age() {
        let fixture = Fixture::new().await;
        let catalog = Arc::new(FakeCatalog::default().with("en", 1..=3));
        let coordinator = fixture.coordinator(catalog, &["en"]);
        coordinator.populate_db(false, None).await.unwrap();

        assert!(coordinator.refresh_languages(false).await.unwrap().is_empty());

        fixture.clock.advance(chrono::Duration::days(8));
        let mut refreshed = coordinator.refresh_languages(false).await.unwrap();
        refreshed.sort();
        assert_eq!(refreshed, vec!["en", META_LANGUAGE]);

        assert_eq!(coordinator.refresh_languages(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_songs_stores_only_loaded_languages() {
        let fixture = Fixture::new().await;
        let mut catalog = FakeCatalog::default().with("en", 1..=3);
        for (id, lang) in [(2, "en"), (500, "de")] {
            catalog.songs.insert(
                id,
                Song {
                    id,
                    lang: lang.into(),
                    title: format!("Repaired {}", id),
                    ..Default::default()
                },
            );
        }
        let coordinator = fixture.coordinator(Arc::new(catalog), &["en"]);
        coordinator.populate_db(false, None).await.unwrap();

        let song = coordinator.refresh_song(500).await.unwrap().unwrap();
        assert_eq!(song.lang, "de");
        assert!(fixture.repo.get_song(500).await.unwrap().is_none());
        assert_eq!(coordinator.refresh_songs(&[500]).await.unwrap().stored, 0);

        let repaired = coordinator.refresh_songs(&[2, 0, 2, 999]).await.unwrap();
        assert_eq!(repaired.songs.len(), 1);
        assert_eq!(repaired.stored, 1);
        assert_eq!(fixture.repo.get_song(2).await.unwrap().unwrap().title, "Repaired 2");
    }

    #[tokio::test]
    async fn test_repair_failure_is_empty() {
        let fixture = Fixture::new().await;
        let coordinator = fixture.coordinator(Arc::new(FakeCatalog::default().failing("fetch")), &[]);
        assert!(coordinator.refresh_song(1).await.unwrap().is_none());
    }
}
