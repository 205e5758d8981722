//! Song API client
//!
//! Thin typed layer over [`HttpClient`] for the remote song service. Search
//! and count requests each own a query slot: issuing a new request on a slot
//! aborts the one still in flight there, so at most one request per slot is
//! outstanding.

use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use core_library::models::{MetaFilter, MetaResult, SearchResult, Song};
use core_library::query::{SongFilter, SortOrder};
use core_library::PageRequest;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{ApiError, Result};
use crate::types::{
    CountResponse, LanguageIndexResponse, LanguagePack, MetaSearchResponse, SongsResponse,
};

/// Ids per `GET /songs?ids=` request
pub const MAX_IDS_PER_REQUEST: usize = 100;

const READ_CHUNK: usize = 64 * 1024;

/// Requests that supersede each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuerySlot {
    Search,
    Count,
}

struct SlotEntry {
    generation: u64,
    token: CancellationToken,
}

pub struct SongApiClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    slots: Mutex<HashMap<QuerySlot, SlotEntry>>,
    generation: AtomicU64,
}

impl SongApiClient {
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `base_url` - API root, e.g. `https://songs.example.com/api`
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    #[instrument(skip(self, query), fields(path = %path))]
    async fn get(&self, path: &str, query: Vec<(String, String)>) -> Result<HttpResponse> {
        let mut request = HttpRequest::get(self.url(path)).header("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }

        let response = self.http_client.execute(request).await?;
        if response.is_success() {
            debug!(status = response.status, "API request succeeded");
            Ok(response)
        } else {
            warn!(status = response.status, "API request failed");
            Err(ApiError::Api {
                status_code: response.status,
                message: response.body_excerpt(200),
            })
        }
    }

    /// Run `request` on `slot`, cancelling whatever ran there before
    async fn in_slot<T, F>(&self, slot: QuerySlot, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slots) = self.slots.lock() {
            let entry = SlotEntry {
                generation,
                token: token.clone(),
            };
            if let Some(previous) = slots.insert(slot, entry) {
                debug!(?slot, "Aborting superseded request");
                previous.token.cancel();
            }
        }

        let result = tokio::select! {
            _ = token.cancelled() => Err(ApiError::Cancelled),
            result = request => result,
        };

        if let Ok(mut slots) = self.slots.lock() {
            if slots.get(&slot).is_some_and(|e| e.generation == generation) {
                slots.remove(&slot);
            }
        }
        result
    }

    fn parse_songs(data: Vec<Value>) -> Vec<Song> {
        data.into_iter()
            .filter_map(|value| match Song::from_wire(value, false) {
                Ok(song) => Some(song),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed song");
                    None
                }
            })
            .collect()
    }

    /// `GET /songs/{id}`; `None` when the service does not know the id
    pub async fn get_song(&self, id: i64) -> Result<Option<Song>> {
        match self.get(&format!("songs/{}", id), Vec::new()).await {
            Ok(response) => {
                let value: Value = serde_json::from_slice(&response.body)?;
                Ok(Some(
                    Song::from_wire(value, false).map_err(|e| ApiError::ParseError(e.to_string()))?,
                ))
            }
            Err(ApiError::Api {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `GET /songs?ids=...`, split into requests of [`MAX_IDS_PER_REQUEST`]
    pub async fn get_songs(&self, ids: &[i64]) -> Result<Vec<Song>> {
        let mut songs = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
            let csv = chunk
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let response: SongsResponse = serde_json::from_slice(
                &self.get("songs", vec![("ids".to_string(), csv)]).await?.body,
            )?;
            songs.extend(Self::parse_songs(response.data));
        }
        Ok(songs)
    }

    /// `GET /meta/search`
    pub async fn search_meta(&self, filter: &MetaFilter) -> Result<MetaResult> {
        let mut query = vec![("q".to_string(), filter.search.clone())];
        if let Some(lang) = &filter.lang {
            query.push(("lang".to_string(), lang.clone()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }

        let response: MetaSearchResponse =
            serde_json::from_slice(&self.get("meta/search", query).await?.body)?;
        Ok(MetaResult {
            sources: response.sources,
            albums: response.albums,
        })
    }

    /// `GET /songs/search` on the [`QuerySlot::Search`] slot
    pub async fn run_search(&self, filter: &SongFilter, page: PageRequest) -> Result<SearchResult> {
        let mut query = filter_params(filter);
        query.push(("page".to_string(), page.page.to_string()));
        query.push(("page_size".to_string(), page.page_size.to_string()));

        self.in_slot(QuerySlot::Search, async {
            let response: SongsResponse =
                serde_json::from_slice(&self.get("songs/search", query).await?.body)?;
            Ok::<_, ApiError>(SearchResult {
                data: Self::parse_songs(response.data),
                total: response.total,
            })
        })
        .await
    }

    /// `GET /songs/count` on the [`QuerySlot::Count`] slot
    pub async fn get_total(&self, filter: &SongFilter) -> Result<u64> {
        let query = filter_params(filter);
        self.in_slot(QuerySlot::Count, async {
            let response: CountResponse =
                serde_json::from_slice(&self.get("songs/count", query).await?.body)?;
            Ok::<_, ApiError>(response.total)
        })
        .await
    }

    /// `GET /langpack/index`
    pub async fn language_packs(&self) -> Result<Vec<LanguagePack>> {
        let response: LanguageIndexResponse =
            serde_json::from_slice(&self.get("langpack/index", Vec::new()).await?.body)?;
        Ok(response.languages)
    }

    /// Stream `/langpack/{language}.json`, reporting the fraction read so far.
    #[instrument(skip(self, progress))]
    pub async fn download_language_pack(
        &self,
        language: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Bytes> {
        let url = self.url(&format!("langpack/{}.json", language));
        let mut stream = self.http_client.download_stream(url).await?;

        let expected = stream.content_length.filter(|&n| n > 0);
        let mut body = BytesMut::with_capacity(expected.unwrap_or(0) as usize);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let read = stream
                .reader
                .read(&mut chunk)
                .await
                .map_err(bridge_traits::error::BridgeError::from)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
            if let Some(total) = expected {
                progress(body.len() as f64 / total as f64);
            }
        }

        progress(1.0);
        debug!(language, bytes = body.len(), "Language pack downloaded");
        Ok(body.freeze())
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}

fn csv(ids: &[i64]) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
}

fn sort_param(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::Title => "title",
        SortOrder::Usage => "usage",
        SortOrder::Rating => "rating",
        SortOrder::Recent => "recent",
        SortOrder::Number => "number",
        SortOrder::Track => "track",
        SortOrder::Id => "id",
    }
}

/// Query-string form of a [`SongFilter`]. Excluded tags are sent negated.
pub fn filter_params(filter: &SongFilter) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if !filter.search.trim().is_empty() {
        query.push(("q".to_string(), filter.search.trim().to_string()));
    }
    for lang in &filter.langs {
        query.push(("lang".to_string(), lang.clone()));
    }
    if let Some(songkey) = &filter.songkey {
        query.push(("songkey".to_string(), songkey.clone()));
    }
    if !filter.sources.is_empty() {
        query.push(("sources".to_string(), csv(&filter.sources)));
    }
    if !filter.albums.is_empty() {
        query.push(("albums".to_string(), csv(&filter.albums)));
    }
    if !filter.tags.is_empty() {
        let tags = filter
            .tags
            .iter()
            .map(|t| {
                if t.include {
                    t.tag_id.to_string()
                } else {
                    format!("-{}", t.tag_id)
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        query.push(("tags".to_string(), tags));
    }

    let flags = [
        ("has_chord", filter.has_chord),
        ("has_sheet", filter.has_sheet),
        ("has_mp3", filter.has_mp3),
        ("is_original", filter.is_original),
        ("copyright_restricted", filter.copyright_restricted),
    ];
    for (name, value) in flags {
        if let Some(value) = value {
            query.push((name.to_string(), flag(value)));
        }
    }

    if let Some(sort) = filter.sort {
        query.push(("sort".to_string(), sort_param(sort).to_string()));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::DownloadStream;
    use crate::testing::{ok, status, MockHttpClient};
    use std::time::Duration;

    fn query_value<'a>(request: &'a HttpRequest, key: &str) -> Vec<&'a str> {
        request
            .query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_get_song_and_missing_song() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .withf(|r| r.url == "https://api.test/songs/7")
            .times(1)
            .returning(|_| ok(r#"{"id": 7, "lang": "en", "title": "Abide", "songxml": "<chord>D</chord>"}"#));
        mock_http
            .expect_execute()
            .withf(|r| r.url == "https://api.test/songs/8")
            .times(1)
            .returning(|_| status(404));

        let client = SongApiClient::new(Arc::new(mock_http), "https://api.test/");

        let song = client.get_song(7).await.unwrap().unwrap();
        assert_eq!(song.title, "Abide");
        assert!(song.has_chord);
        assert!(client.get_song(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_songs_splits_requests() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(2).returning(|request| {
            let ids = query_value(&request, "ids")[0].to_string();
            let data: Vec<Value> = ids
                .split(',')
                .map(|id| serde_json::json!({"id": id.parse::<i64>().unwrap(), "lang": "en", "title": "t"}))
                .collect();
            ok(&serde_json::json!({ "data": data }).to_string())
        });

        let client = SongApiClient::new(Arc::new(mock_http), "https://api.test");
        let ids: Vec<i64> = (1..=150).collect();
        let songs = client.get_songs(&ids).await.unwrap();

        assert_eq!(songs.len(), 150);
        assert_eq!(songs[149].id, 150);
    }

    #[tokio::test]
    async fn test_run_search_sends_filter() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .withf(|r| {
                r.url.ends_with("/songs/search")
                    && query_value(r, "lang") == vec!["en", "tr"]
                    && query_value(r, "tags") == vec!["4,-9"]
                    && query_value(r, "has_chord") == vec!["1"]
                    && query_value(r, "page") == vec!["2"]
                    && query_value(r, "page_size") == vec!["25"]
                    && query_value(r, "sort") == vec!["usage"]
            })
            .times(1)
            .returning(|_| ok(r#"{"data": [{"id": 1, "lang": "en", "title": "A"}, {"id": 0}], "total": 31}"#));

        let client = SongApiClient::new(Arc::new(mock_http), "https://api.test");
        let filter = SongFilter::new()
            .lang("en")
            .lang("tr")
            .include_tag(4)
            .exclude_tag(9)
            .has_chord(true)
            .sort(SortOrder::Usage);

        let result = client.run_search(&filter, PageRequest::new(2, 25)).await.unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.total, Some(31));
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().returning(|_| status(500));

        let client = SongApiClient::new(Arc::new(mock_http), "https://api.test");
        let err = client.get_total(&SongFilter::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::Api { status_code: 500, .. }));
    }

    #[tokio::test]
    async fn test_download_reports_progress() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_download_stream()
            .withf(|url| url == "https://api.test/langpack/en.json")
            .returning(|_| {
                let body = vec![b'x'; 200_000];
                Ok(DownloadStream {
                    content_length: Some(body.len() as u64),
                    reader: Box::new(std::io::Cursor::new(body)),
                })
            });

        let client = SongApiClient::new(Arc::new(mock_http), "https://api.test");
        let seen = Mutex::new(Vec::new());
        let body = client
            .download_language_pack("en", &|f| seen.lock().unwrap().push(f))
            .await
            .unwrap();

        assert_eq!(body.len(), 200_000);
        let seen = seen.into_inner().unwrap();
        assert!(seen.len() >= 2);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    /// Answers after a delay so a second request can supersede the first
    struct SlowHttpClient;

    #[async_trait]
    impl HttpClient for SlowHttpClient {
        async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse> {
            let delay = if query_value(&request, "q") == vec!["slow"] { 500 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            ok(r#"{"data": [], "total": 0}"#)
        }

        async fn download_stream(&self, _url: String) -> bridge_traits::error::Result<DownloadStream> {
            Err(BridgeError::NotAvailable("download_stream".to_string()))
        }
    }

    #[tokio::test]
    async fn test_new_search_aborts_previous_in_same_slot() {
        let client = Arc::new(SongApiClient::new(Arc::new(SlowHttpClient), "https://api.test"));

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .run_search(&SongFilter::new().search("slow"), PageRequest::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let count = client.get_total(&SongFilter::new().search("fast")).await;
        assert!(count.is_ok(), "other slots are unaffected");

        let second = client
            .run_search(&SongFilter::new().search("fast"), PageRequest::default())
            .await;
        assert!(second.is_ok());
        assert!(matches!(first.await.unwrap(), Err(ApiError::Cancelled)));
    }
}
