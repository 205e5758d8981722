mod common;

use common::*;
use core_runtime::{DriverKind, StoreConfig};
use core_service::{open_song_database, populate_or_fallback, CoreError, SongFilter};
use core_library::LibraryError;
use bridge_desktop::MemoryFavouritesStore;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_unopenable_store_falls_back_to_online() {
    let dir = TempDir::new().unwrap();
    let config = store_config(
        FakeSongApi::new(),
        settings().await,
        &dir.path().join("missing").join("songs.db"),
        DriverKind::Synchronous,
        &["en"],
    )
    .await;

    let db = open_song_database(&config).await.unwrap();
    db.populate(false, None).await.unwrap();

    assert!(db.loaded_languages().await.unwrap().is_empty());
    let song = db.get_song(42, false, false).await.unwrap().unwrap();
    assert_eq!(song.title, "Hymn 42");
}

#[tokio::test]
async fn test_too_many_failures_switches_to_online() {
    let dir = TempDir::new().unwrap();
    let config = store_config(
        FakeSongApi::failing(&["tr"]),
        settings().await,
        &dir.path().join("songs.db"),
        DriverKind::Synchronous,
        &["en", "tr"],
    )
    .await;

    let local = open_song_database(&config).await.unwrap();
    let db = populate_or_fallback(Arc::clone(&local), &config, false, None)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&db, &local));
    assert!(db.common().is_populated());
    assert!(db.loaded_languages().await.unwrap().is_empty());
    assert!(!local.common().is_populated());

    let song = db.get_song(EN_COUNT + 2, false, false).await.unwrap().unwrap();
    assert_eq!(song.lang, "tr");
}

#[tokio::test]
async fn test_required_language_failure_is_returned() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::builder()
        .database_path(dir.path().join("songs.db"))
        .api_base_url(BASE_URL)
        .languages(["en", "tr"])
        .required_languages(["tr"])
        .failure_threshold(1.0)
        .http_client(FakeSongApi::failing(&["tr"]))
        .settings_store(settings().await)
        .favourites(Arc::new(MemoryFavouritesStore::new()))
        .build()
        .await
        .unwrap();

    let db = open_song_database(&config).await.unwrap();
    let err = populate_or_fallback(Arc::clone(&db), &config, false, None)
        .await
        .err()
        .unwrap();

    assert!(!err.advises_fallback());
    assert!(matches!(
        err,
        CoreError::Library(LibraryError::PopulateFailed { fallback_advised: false, .. })
    ));
    assert!(!db.common().is_populated());

    // English made it in regardless
    assert_eq!(
        db.get_total(&SongFilter::new().lang("en")).await.unwrap(),
        EN_COUNT as u64
    );
}

#[tokio::test]
async fn test_online_driver_skips_local_store() {
    let dir = TempDir::new().unwrap();
    let api = FakeSongApi::new();
    let config = store_config(
        Arc::clone(&api),
        settings().await,
        &dir.path().join("songs.db"),
        DriverKind::Online,
        &["en"],
    )
    .await;

    let db = populate_or_fallback(open_song_database(&config).await.unwrap(), &config, true, None)
        .await
        .unwrap();

    assert!(db.common().is_initialized());
    assert!(api.downloads().is_empty());
    assert!(!dir.path().join("songs.db").exists());
}
