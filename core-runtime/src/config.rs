//! # Store Configuration Module
//!
//! Provides configuration management for the song store.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! [`StoreConfig`] holding every bridge and tuning knob the store needs. It
//! enforces fail-fast validation so a misconfigured store never reaches
//! `initialize`.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - catalog downloads and online fallback
//! - `SettingsStore` - schema-version mirror, last-update map, latency average
//! - `FavouritesStore` - seeds the mirrored favourite flag at import time
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! all three are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{DriverKind, StoreConfig};
//!
//! let config = StoreConfig::builder()
//!     .database_path("/var/lib/songbook/songs.db")
//!     .api_base_url("https://songs.example.com/api")
//!     .languages(["en", "tr"])
//!     .required_languages(["en"])
//!     .driver(DriverKind::Worker)
//!     .build()
//!     .await?;
//! ```
//!
//! ## Error Handling
//!
//! The builder returns [`Error::Config`] for invalid values and
//! [`Error::CapabilityMissing`] when a bridge has no implementation.

use crate::error::{Error, Result};
use bridge_traits::{Clock, FavouritesStore, HttpClient, SettingsStore, SystemClock};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Path value selecting a private in-memory database
pub const MEMORY_DATABASE: &str = ":memory:";

/// Partitions older than this are re-imported by `refresh_languages`
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_FOREGROUND_CONCURRENCY: usize = 4;
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 250;
pub const DEFAULT_FAILURE_THRESHOLD: f64 = 0.3;

/// Which storage backend serves queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// Synchronous callback transactions on a blocking thread
    #[default]
    Synchronous,
    /// Message-passed transactions against an isolated execution unit
    Worker,
    /// No local engine; every query goes to the remote API
    Online,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Synchronous => "synchronous",
            DriverKind::Worker => "worker",
            DriverKind::Online => "online",
        }
    }

    pub fn is_local(&self) -> bool {
        !matches!(self, DriverKind::Online)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synchronous" | "sync" => Ok(DriverKind::Synchronous),
            "worker" => Ok(DriverKind::Worker),
            "online" => Ok(DriverKind::Online),
            other => Err(Error::Config(format!("Unknown driver kind: {}", other))),
        }
    }
}

/// Song store configuration.
///
/// Use [`StoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct StoreConfig {
    /// SQLite database file, or [`MEMORY_DATABASE`]; `None` only for the online driver
    pub database_path: Option<PathBuf>,

    /// Root URL of the song API and language-pack catalog
    pub api_base_url: String,

    /// Languages the store should hold locally
    pub languages: Vec<String>,

    /// Languages whose import failure fails `populate`
    pub required_languages: Vec<String>,

    pub driver: DriverKind,

    /// Maximum partition age before `refresh_languages` re-imports it
    pub max_age: Duration,

    /// Parallel partition downloads when populating in the foreground
    pub foreground_concurrency: usize,

    /// Songs per write transaction during import
    pub import_batch_size: usize,

    /// Fraction of failed languages above which `populate` fails
    pub failure_threshold: f64,

    pub http_client: Arc<dyn HttpClient>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub favourites: Arc<dyn FavouritesStore>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_path", &self.database_path)
            .field("api_base_url", &self.api_base_url)
            .field("languages", &self.languages)
            .field("required_languages", &self.required_languages)
            .field("driver", &self.driver)
            .field("max_age", &self.max_age)
            .field("foreground_concurrency", &self.foreground_concurrency)
            .field("import_batch_size", &self.import_batch_size)
            .field("failure_threshold", &self.failure_threshold)
            .field("http_client", &"HttpClient { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("favourites", &"FavouritesStore { ... }")
            .finish()
    }
}

impl StoreConfig {
    /// Creates a new builder for constructing a `StoreConfig`.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Whether the database lives only in memory
    pub fn is_in_memory(&self) -> bool {
        self.database_path
            .as_deref()
            .map(is_memory_path)
            .unwrap_or(false)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Local drivers have a database path; the worker driver needs a file
    /// - The API base URL is an http(s) URL
    /// - Required languages are a subset of the desired languages
    /// - Concurrency, batch size and failure threshold are in range
    pub fn validate(&self) -> Result<()> {
        match (&self.database_path, self.driver) {
            (None, DriverKind::Synchronous | DriverKind::Worker) => {
                return Err(Error::Config(format!(
                    "The {} driver requires a database path. Use .database_path() to set it.",
                    self.driver
                )));
            }
            (Some(path), _) if path.as_os_str().is_empty() => {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
            (Some(path), DriverKind::Worker) if is_memory_path(path) => {
                return Err(Error::Config(
                    "The worker driver shares its database across connections \
                     and requires a file path, not :memory:"
                        .to_string(),
                ));
            }
            _ => {}
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "API base URL must be http(s): {:?}",
                self.api_base_url
            )));
        }

        if let Some(missing) = self
            .required_languages
            .iter()
            .find(|lang| !self.languages.contains(lang))
        {
            return Err(Error::Config(format!(
                "Required language {} is not in the language list",
                missing
            )));
        }

        if self.languages.iter().any(|lang| lang.trim().is_empty()) {
            return Err(Error::Config("Language codes cannot be empty".to_string()));
        }

        if self.foreground_concurrency == 0 {
            return Err(Error::Config(
                "Foreground concurrency must be at least 1".to_string(),
            ));
        }

        if self.import_batch_size == 0 {
            return Err(Error::Config(
                "Import batch size must be at least 1".to_string(),
            ));
        }

        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "Failure threshold must be in (0, 1], got {}",
                self.failure_threshold
            )));
        }

        Ok(())
    }
}

fn is_memory_path(path: &Path) -> bool {
    path.as_os_str() == MEMORY_DATABASE
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use the default. \
             Embedded hosts: inject a native adapter.",
            capability, purpose
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::DefaultBridge(format!("HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing("HttpClient", "catalog downloads"))
}

#[cfg(feature = "desktop-shims")]
async fn provide_default_settings_store(
    database_path: Option<&Path>,
) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;

    let store = match database_path {
        Some(path) if is_memory_path(path) => SqliteSettingsStore::in_memory().await,
        Some(path) => {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(bridge_desktop::default_data_dir);
            SqliteSettingsStore::new(dir.join("settings.db")).await
        }
        None => SqliteSettingsStore::new(bridge_desktop::default_data_dir().join("settings.db")).await,
    }
    .map_err(|e| Error::DefaultBridge(format!("SettingsStore: {}", e)))?;

    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
async fn provide_default_settings_store(
    _database_path: Option<&Path>,
) -> Result<Arc<dyn SettingsStore>> {
    Err(capability_missing(
        "SettingsStore",
        "the schema-version mirror and last-update map",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_favourites() -> Result<Arc<dyn FavouritesStore>> {
    Ok(Arc::new(bridge_desktop::MemoryFavouritesStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_favourites() -> Result<Arc<dyn FavouritesStore>> {
    Err(capability_missing("FavouritesStore", "favourite filters"))
}

/// Builder for constructing [`StoreConfig`] instances.
#[derive(Default)]
pub struct StoreConfigBuilder {
    database_path: Option<PathBuf>,
    api_base_url: Option<String>,
    languages: Vec<String>,
    required_languages: Vec<String>,
    driver: DriverKind,
    max_age: Option<Duration>,
    foreground_concurrency: Option<usize>,
    import_batch_size: Option<usize>,
    failure_threshold: Option<f64>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    favourites: Option<Arc<dyn FavouritesStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl StoreConfigBuilder {
    /// Sets the database file path; `":memory:"` selects a private in-memory database.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the API root (required).
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn required_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn foreground_concurrency(mut self, concurrency: usize) -> Self {
        self.foreground_concurrency = Some(concurrency);
        self
    }

    pub fn import_batch_size(mut self, batch_size: usize) -> Self {
        self.import_batch_size = Some(batch_size);
        self
    }

    pub fn failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the settings store implementation.
    ///
    /// The desktop default is a SQLite file named `settings.db` next to the
    /// song database.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn favourites(mut self, favourites: Arc<dyn FavouritesStore>) -> Self {
        self.favourites = Some(favourites);
        self
    }

    /// Overrides the time source (tests pin it with `FixedClock`).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// Async because the default settings store opens its database.
    pub async fn build(self) -> Result<StoreConfig> {
        let api_base_url = self.api_base_url.ok_or_else(|| {
            Error::Config("API base URL is required. Use .api_base_url() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let favourites = match self.favourites {
            Some(favourites) => favourites,
            None => provide_default_favourites()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(self.database_path.as_deref()).await?,
        };

        let config = StoreConfig {
            database_path: self.database_path,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            languages: self.languages,
            required_languages: self.required_languages,
            driver: self.driver,
            max_age: self.max_age.unwrap_or(DEFAULT_MAX_AGE),
            foreground_concurrency: self
                .foreground_concurrency
                .unwrap_or(DEFAULT_FOREGROUND_CONCURRENCY),
            import_batch_size: self.import_batch_size.unwrap_or(DEFAULT_IMPORT_BATCH_SIZE),
            failure_threshold: self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            http_client,
            settings_store,
            favourites,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
