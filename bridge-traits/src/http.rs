//! HTTP contract
//!
//! The song API client and the language-pack downloader only issue GETs:
//! small JSON requests through [`HttpClient::execute`] and partition
//! downloads through [`HttpClient::download_stream`], which hands back a
//! reader so byte progress can be reported while the body arrives.
//!
//! Implementations do not retry. A failed partition download is recorded
//! by the sync layer as a failed language instead.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Query pairs in insertion order; repeated keys are allowed
    pub query: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Every value sent under `key`
    pub fn query_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Body as text for error messages, cut to `max` bytes on a char boundary
    pub fn body_excerpt(&self, max: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(max) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.into_owned(),
        }
    }
}

/// Response body as a reader, with the length the server announced
pub struct DownloadStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
}

impl fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
///
/// async fn index(client: &dyn HttpClient) -> bridge_traits::error::Result<bytes::Bytes> {
///     let response = client
///         .execute(HttpRequest::get("https://songs.example.com/langpack/index"))
///         .await?;
///     Ok(response.body)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request and buffer the whole body. Non-2xx statuses are
    /// returned as responses, not errors; transport failures are errors.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// GET `url` and stream the body. Non-2xx statuses are errors here.
    async fn download_stream(&self, url: String) -> Result<DownloadStream>;
}
