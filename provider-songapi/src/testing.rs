use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{DownloadStream, HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use mockall::mock;
use std::collections::HashMap;

mock! {
    pub HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        async fn download_stream(&self, url: String) -> Result<DownloadStream>;
    }
}

pub fn ok(body: &str) -> Result<HttpResponse> {
    Ok(HttpResponse {
        status: 200,
        headers: HashMap::new(),
        body: Bytes::from(body.to_string()),
    })
}

pub fn status(code: u16) -> Result<HttpResponse> {
    Ok(HttpResponse {
        status: code,
        headers: HashMap::new(),
        body: Bytes::from_static(b"nope"),
    })
}
