//! [`HttpClient`] over reqwest

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{DownloadStream, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use futures::TryStreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("songbook-core/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout for JSON calls. Partition downloads only
/// carry the connect timeout; their size varies too much for a fixed cap.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ReqwestHttpClient {
    client: Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// Wrap a preconfigured client (proxies, custom roots)
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout.unwrap_or(self.timeout));
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder
    }
}

fn transport_error(e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::OperationFailed(format!("Request timed out: {}", e))
    } else if e.is_connect() {
        BridgeError::OperationFailed(format!("Connection failed: {}", e))
    } else {
        BridgeError::OperationFailed(e.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self.build(request).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            transport_error(e)
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(transport_error)?;

        debug!(url = %url, status, bytes = body.len(), "HTTP request completed");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn download_stream(&self, url: String) -> Result<DownloadStream> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::OperationFailed(format!(
                "HTTP {} downloading {}",
                status.as_u16(),
                url
            )));
        }

        let content_length = response.content_length();
        debug!(url = %url, ?content_length, "Download started");
        let stream = response.bytes_stream().map_err(std::io::Error::other);

        Ok(DownloadStream {
            content_length,
            reader: Box::new(tokio_util::io::StreamReader::new(stream)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_timeout_and_query() {
        let client = ReqwestHttpClient::with_timeout(Duration::from_secs(3)).unwrap();
        let request = client
            .build(
                HttpRequest::get("https://songs.test/songs")
                    .query("ids", "1,2")
                    .query("lang", "en"),
            )
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().query(), Some("ids=1%2C2&lang=en"));
        assert_eq!(request.timeout(), Some(&Duration::from_secs(3)));
    }

    #[test]
    fn test_request_timeout_override() {
        let client = ReqwestHttpClient::new().unwrap();
        let request = client
            .build(HttpRequest::get("https://songs.test/langpack/index").timeout(Duration::from_secs(1)))
            .build()
            .unwrap();

        assert_eq!(request.timeout(), Some(&Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let client = ReqwestHttpClient::with_timeout(Duration::from_millis(500)).unwrap();
        let err = client
            .execute(HttpRequest::get("http://127.0.0.1:9/langpack/index"))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::OperationFailed(_)));
    }
}
