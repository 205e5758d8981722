//! In-process song API serving a deterministic English + Turkish corpus.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::{MemoryFavouritesStore, SqliteSettingsStore};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{DownloadStream, HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::SettingsStore;
use bytes::Bytes;
use core_library::codec;
use core_runtime::{DriverKind, StoreConfig};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BASE_URL: &str = "https://songs.test/api";

pub const EN_COUNT: i64 = 3394;
pub const TR_COUNT: i64 = 3050;
pub const TOTAL: i64 = EN_COUNT + TR_COUNT;

/// The one song titled "Silent Night"; also the seeded favourite
pub const SILENT_NIGHT: i64 = 1000;

/// Tag carried by every fourth English song
pub const QUARTER_TAG: i64 = 7;

pub fn language_of(id: i64) -> Option<&'static str> {
    match id {
        1..=EN_COUNT => Some("en"),
        _ if id > EN_COUNT && id <= TOTAL => Some("tr"),
        _ => None,
    }
}

/// Canonical wire form of song `id`.
///
/// English flags are spread with multiplicative hashes that are
/// permutations modulo 3394, so each threshold yields an exact count:
/// 1433 with chords, 3253 originals, 252 in C.
pub fn song_json(id: i64) -> Value {
    let Some(lang) = language_of(id) else {
        return Value::Null;
    };
    let english = lang == "en";

    let has_chord = english && (id * 7919) % EN_COUNT < 1433;
    let is_original = english && (id * 104729) % EN_COUNT < 3253;
    let songkey = if english && (id * 13) % EN_COUNT < 252 { "C" } else { "G" };

    let title = if id == SILENT_NIGHT {
        "Silent Night".to_string()
    } else if english {
        format!("Hymn {}", id)
    } else {
        format!("Ilahi {}", id)
    };
    let songxml = if has_chord {
        format!("<verse><chord>C</chord>Line {}</verse>", id)
    } else {
        format!("<verse>Line {}</verse>", id)
    };
    let tag = if english && id % 4 == 0 { QUARTER_TAG } else { 9 };
    let (source, number) = if english { (1, id) } else { (2, id - EN_COUNT) };

    json!({
        "id": id,
        "lang": lang,
        "title": title,
        "songxml": songxml,
        "songkey": songkey,
        "is_original": is_original,
        "usage": id % 23,
        "sources": [{"id": source, "number": number}],
        "tags": [tag],
    })
}

fn partition(lang: &str) -> Option<Value> {
    match lang {
        // English ships compressed, Turkish plain
        "en" => Some(json!({
            "compressed": true,
            "data": (1..=EN_COUNT).map(|id| codec::compress(song_json(id))).collect::<Vec<_>>(),
        })),
        "tr" => Some(json!({
            "data": (EN_COUNT + 1..=TOTAL).map(song_json).collect::<Vec<_>>(),
        })),
        "meta" => Some(json!({
            "song_source_info": [
                {"id": 1, "lang": "en", "name": "Hymns of Faith", "abbreviation": "HF", "song_count": EN_COUNT},
                {"id": 2, "lang": "tr", "name": "Ilahiler", "abbreviation": "IL", "song_count": TR_COUNT},
            ],
            "albums": [{"id": 1, "lang": "en", "title": "Christmas Carols"}],
        })),
        _ => None,
    }
}

#[derive(Default)]
pub struct FakeSongApi {
    failing: HashSet<String>,
    downloads: Mutex<Vec<String>>,
    song_requests: AtomicUsize,
}

impl FakeSongApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Downloads of these languages fail with a network error
    pub fn failing(languages: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: languages.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    /// Song lookups served so far, single and batched
    pub fn song_requests(&self) -> usize {
        self.song_requests.load(Ordering::SeqCst)
    }

    fn respond(&self, path: &str, request: &HttpRequest) -> HttpResponse {
        let query: HashMap<&str, &str> = request
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        match path {
            "langpack/index" => json_response(json!({
                "languages": [
                    {"lang": "en", "songs": EN_COUNT},
                    {"lang": "tr", "songs": TR_COUNT},
                ]
            })),
            "songs" => {
                let data: Vec<Value> = query
                    .get("ids")
                    .map(|csv| {
                        csv.split(',')
                            .filter_map(|id| id.trim().parse::<i64>().ok())
                            .filter(|&id| language_of(id).is_some())
                            .map(song_json)
                            .collect()
                    })
                    .unwrap_or_default();
                json_response(json!({ "data": data }))
            }
            _ => match path.strip_prefix("songs/").and_then(|id| id.parse::<i64>().ok()) {
                Some(id) if language_of(id).is_some() => json_response(song_json(id)),
                _ => not_found(),
            },
        }
    }
}

fn json_response(body: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: HashMap::new(),
        body: Bytes::from(body.to_string()),
    }
}

fn not_found() -> HttpResponse {
    HttpResponse {
        status: 404,
        headers: HashMap::new(),
        body: Bytes::from_static(b"not found"),
    }
}

#[async_trait]
impl HttpClient for FakeSongApi {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .trim_start_matches('/')
            .to_string();
        if path.starts_with("songs") {
            self.song_requests.fetch_add(1, Ordering::SeqCst);
        }
        Ok(self.respond(&path, &request))
    }

    async fn download_stream(&self, url: String) -> Result<DownloadStream> {
        let lang = url
            .rsplit('/')
            .next()
            .and_then(|file| file.strip_suffix(".json"))
            .unwrap_or_default()
            .to_string();

        if self.failing.contains(&lang) {
            return Err(BridgeError::OperationFailed(format!("connection reset fetching {}", lang)));
        }
        let body = partition(&lang)
            .ok_or_else(|| BridgeError::OperationFailed(format!("HTTP 404 for {}", url)))?;

        self.downloads.lock().unwrap().push(lang);
        let bytes = body.to_string().into_bytes();
        Ok(DownloadStream {
            content_length: Some(bytes.len() as u64),
            reader: Box::new(std::io::Cursor::new(bytes)),
        })
    }
}

pub async fn settings() -> Arc<dyn SettingsStore> {
    Arc::new(SqliteSettingsStore::in_memory().await.unwrap())
}

pub async fn store_config(
    api: Arc<FakeSongApi>,
    settings: Arc<dyn SettingsStore>,
    database: &Path,
    driver: DriverKind,
    languages: &[&str],
) -> StoreConfig {
    StoreConfig::builder()
        .database_path(database)
        .api_base_url(BASE_URL)
        .languages(languages.iter().copied())
        .driver(driver)
        .http_client(api)
        .settings_store(settings)
        .favourites(Arc::new(MemoryFavouritesStore::with_ids([SILENT_NIGHT])))
        .build()
        .await
        .unwrap()
}
