//! Backend selection
//!
//! Opens the driver named in the [`StoreConfig`], wraps it in a
//! [`LocalSongDatabase`] and falls back to the [`OnlineSongDatabase`] when
//! the local store cannot be opened or populated.

use bridge_traits::database::DatabaseDriver;
use core_library::adapters::{SqliteSyncDriver, WorkerDriver};
use core_library::contract::{ProgressFn, SongDatabase};
use core_runtime::{DriverKind, StoreConfig};
use provider_songapi::{OnlineSongDatabase, SongApiClient};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::local::LocalSongDatabase;

/// Open and initialize the configured backend.
///
/// A local driver that fails to open or initialize is logged and replaced
/// by the online backend. The returned database has passed `initialize`
/// but not `populate`.
pub async fn open_song_database(config: &StoreConfig) -> Result<Arc<dyn SongDatabase>> {
    config.validate()?;
    let client = api_client(config);

    if config.driver.is_local() {
        match open_local(config, Arc::clone(&client)).await {
            Ok(db) => return Ok(db),
            Err(e) => warn!(
                driver = %config.driver,
                error = %e,
                "Local song store unavailable, falling back to online backend"
            ),
        }
    }

    open_online(config, client).await
}

/// Populate `db`, switching to the online backend when too many languages
/// failed to import.
///
/// Any other populate error is returned unchanged.
pub async fn populate_or_fallback(
    db: Arc<dyn SongDatabase>,
    config: &StoreConfig,
    background: bool,
    progress: Option<ProgressFn>,
) -> Result<Arc<dyn SongDatabase>> {
    match db.populate(background, progress.clone()).await {
        Ok(()) => Ok(db),
        Err(e) => {
            let err = CoreError::from(e);
            if !err.advises_fallback() {
                return Err(err);
            }
            warn!(error = %err, "Populate failed, switching to online backend");
            let online = open_online(config, api_client(config)).await?;
            online.populate(background, progress).await?;
            Ok(online)
        }
    }
}

fn api_client(config: &StoreConfig) -> Arc<SongApiClient> {
    Arc::new(SongApiClient::new(
        Arc::clone(&config.http_client),
        config.api_base_url.clone(),
    ))
}

async fn open_driver(config: &StoreConfig) -> Result<Arc<dyn DatabaseDriver>> {
    let path = config.database_path.as_ref().ok_or_else(|| {
        CoreError::InitializationFailed(format!("{} driver has no database path", config.driver))
    })?;

    let driver: Arc<dyn DatabaseDriver> = match config.driver {
        DriverKind::Synchronous if config.is_in_memory() => {
            Arc::new(SqliteSyncDriver::open_in_memory()?)
        }
        DriverKind::Synchronous => Arc::new(SqliteSyncDriver::open(path)?),
        DriverKind::Worker => Arc::new(WorkerDriver::spawn(path.clone()).await?),
        DriverKind::Online => {
            return Err(CoreError::InitializationFailed(
                "online backend has no local driver".to_string(),
            ))
        }
    };
    Ok(driver)
}

async fn open_local(
    config: &StoreConfig,
    client: Arc<SongApiClient>,
) -> Result<Arc<dyn SongDatabase>> {
    let driver = open_driver(config).await?;
    let db = LocalSongDatabase::from_config(driver, client, config).await;
    db.initialize().await?;

    info!(driver = %config.driver, "Opened local song store");
    Ok(Arc::new(db))
}

async fn open_online(
    config: &StoreConfig,
    client: Arc<SongApiClient>,
) -> Result<Arc<dyn SongDatabase>> {
    let db = OnlineSongDatabase::new(
        client,
        Arc::clone(&config.settings_store),
        Arc::clone(&config.favourites),
    )
    .await;
    db.initialize().await?;

    info!(base_url = %config.api_base_url, "Opened online song backend");
    Ok(Arc::new(db))
}
