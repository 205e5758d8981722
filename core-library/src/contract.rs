//! Generic Database Contract
//!
//! The lifecycle every song backend follows (`initialize` → `populate` →
//! query) and the concerns they share, regardless of whether songs live in
//! a local engine or behind the online API.
//!
//! ## Gates
//!
//! [`DatabaseCommon`] holds two one-way gates. `initialized` opens once the
//! backend can answer queries; `populated` opens once every required
//! language is present. Callers await them instead of polling.
//!
//! ## Debounce
//!
//! Live-typing search waits `avg_query_time × 3` between keystrokes. The
//! average is an exponential moving average over recent query latencies,
//! persisted in the settings store so a new session starts calibrated.
//!
//! ## Query validity
//!
//! A monotonic counter bumped whenever the dataset changes underneath a
//! live query. Consumers capture it before issuing a query and discard the
//! results if it moved.

use async_trait::async_trait;
use bridge_traits::favourites::FavouritesStore;
use bridge_traits::storage::SettingsStore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{LanguageCounts, MetaFilter, MetaResult, SearchResult, Song};
use crate::pagination::{Page, PageRequest};
use crate::query::SongFilter;

/// Settings key holding the persisted moving average, in milliseconds
pub const AVG_QUERY_TIME_KEY: &str = "avg_query_time";

/// Starting average before any query has been timed
pub const DEFAULT_AVG_QUERY_MS: f64 = 20.0;

const AVERAGE_WINDOW: f64 = 50.0;
const DEBOUNCE_FACTOR: f64 = 3.0;

/// Populate progress callback, fed fractions in `0.0..=1.0`
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// State shared by every backend
pub struct DatabaseCommon {
    settings: Arc<dyn SettingsStore>,
    favourites: Arc<dyn FavouritesStore>,
    initialized: watch::Sender<bool>,
    populated: watch::Sender<bool>,
    avg_query_ms: Mutex<f64>,
    query_validity: AtomicU64,
}

impl DatabaseCommon {
    /// Load the persisted query-time average; a missing or unreadable value falls back to the default.
    pub async fn new(settings: Arc<dyn SettingsStore>, favourites: Arc<dyn FavouritesStore>) -> Self {
        let avg = match settings.get_f64(AVG_QUERY_TIME_KEY).await {
            Ok(Some(avg)) if avg.is_finite() && avg > 0.0 => avg,
            Ok(_) => DEFAULT_AVG_QUERY_MS,
            Err(e) => {
                warn!(error = %e, "Failed to read average query time");
                DEFAULT_AVG_QUERY_MS
            }
        };

        Self {
            settings,
            favourites,
            initialized: watch::channel(false).0,
            populated: watch::channel(false).0,
            avg_query_ms: Mutex::new(avg),
            query_validity: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn favourites(&self) -> &Arc<dyn FavouritesStore> {
        &self.favourites
    }

    // -------------------------------------------------------------------------
    // Gates
    // -------------------------------------------------------------------------

    pub fn mark_initialized(&self) {
        self.initialized.send_replace(true);
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    pub async fn wait_initialized(&self) {
        let mut rx = self.initialized.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|open| *open).await;
    }

    pub fn mark_populated(&self) {
        self.populated.send_replace(true);
    }

    pub fn is_populated(&self) -> bool {
        *self.populated.borrow()
    }

    pub async fn wait_populated(&self) {
        let mut rx = self.populated.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }

    // -------------------------------------------------------------------------
    // Timing
    // -------------------------------------------------------------------------

    pub fn avg_query_time(&self) -> Duration {
        let avg = self
            .avg_query_ms
            .lock()
            .map(|avg| *avg)
            .unwrap_or(DEFAULT_AVG_QUERY_MS);
        Duration::from_secs_f64(avg / 1000.0)
    }

    /// Pause between keystrokes before a live search fires
    pub fn debounce(&self) -> Duration {
        self.avg_query_time().mul_f64(DEBOUNCE_FACTOR)
    }

    /// Fold one query latency into the moving average and persist it.
    pub async fn record_query_time(&self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        let updated = match self.avg_query_ms.lock() {
            Ok(mut avg) => {
                *avg += (sample_ms - *avg) / AVERAGE_WINDOW;
                *avg
            }
            Err(_) => return,
        };

        if let Err(e) = self.settings.set_f64(AVG_QUERY_TIME_KEY, updated).await {
            debug!(error = %e, "Failed to persist average query time");
        }
    }

    // -------------------------------------------------------------------------
    // Query validity
    // -------------------------------------------------------------------------

    pub fn query_validity(&self) -> u64 {
        self.query_validity.load(Ordering::Acquire)
    }

    /// Invalidate in-flight queries; returns the new validity
    pub fn bump_validity(&self) -> u64 {
        self.query_validity.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Positive ids, first occurrence kept, order preserved
pub fn normalize_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .copied()
        .filter(|&id| id > 0 && seen.insert(id))
        .collect()
}

/// Lay `fetched` out in `requested` order, one entry per requested id at most.
///
/// With `fill_gaps` every requested id gets an entry, using a
/// [`Song::not_loaded`] placeholder when the backend had nothing.
pub fn arrange(requested: &[i64], fetched: Vec<Song>, fill_gaps: bool) -> Vec<Song> {
    let mut by_id: HashMap<i64, Song> = fetched.into_iter().map(|song| (song.id, song)).collect();

    requested
        .iter()
        .filter_map(|&id| match by_id.remove(&id) {
            Some(song) => Some(song),
            None if fill_gaps => Some(Song::not_loaded(id)),
            None => None,
        })
        .collect()
}

/// Lifecycle and query contract shared by local and online backends
#[async_trait]
pub trait SongDatabase: Send + Sync {
    fn common(&self) -> &DatabaseCommon;

    /// Prepare the backend; idempotent. Opens the `initialized` gate.
    async fn initialize(&self) -> Result<()>;

    /// Bring the configured languages in. Opens the `populated` gate once required languages are present.
    async fn populate(&self, background: bool, progress: Option<ProgressFn>) -> Result<()>;

    async fn search_meta(&self, filter: &MetaFilter) -> Result<MetaResult>;

    /// One song; `allow_repair` permits fetching it remotely when absent, `want_export` attaches the wire form
    async fn get_song(&self, id: i64, allow_repair: bool, want_export: bool) -> Result<Option<Song>>;

    /// Backend lookup behind [`get_songs`](Self::get_songs); may return fewer songs, in any order.
    async fn fetch_songs(&self, ids: &[i64], allow_repair: bool) -> Result<Vec<Song>>;

    /// One page of matches, plus the total when it came for free
    async fn run_search(&self, filter: &SongFilter, page: PageRequest) -> Result<SearchResult>;

    async fn get_total(&self, filter: &SongFilter) -> Result<u64>;

    /// Mirror a favourite change made in the favourites store
    async fn set_favourite(&self, id: i64, favourite: bool) -> Result<()>;

    async fn loaded_languages(&self) -> Result<LanguageCounts>;

    /// Songs for `ids`, in the requested order.
    ///
    /// Non-positive and repeated ids are dropped. Without `fill_gaps` the
    /// result holds only songs the backend returned; with it, exactly one
    /// entry per remaining id.
    async fn get_songs(&self, ids: &[i64], fill_gaps: bool, allow_repair: bool) -> Result<Vec<Song>> {
        let requested = normalize_ids(ids);
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let fetched = self.fetch_songs(&requested, allow_repair).await?;
        Ok(arrange(&requested, fetched, fill_gaps))
    }

    /// Timed search wrapped in a [`Page`]; the latency feeds the debounce average.
    async fn search(&self, filter: &SongFilter, page: PageRequest) -> Result<Page<Song>> {
        let started = Instant::now();
        let result = self.run_search(filter, page).await?;
        let total = match result.total {
            Some(total) => total,
            None => self.get_total(filter).await?,
        };
        self.common().record_query_time(started.elapsed()).await;

        Ok(Page::new(result.data, total, page))
    }
}
