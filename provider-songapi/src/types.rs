//! Song API response types

use core_library::models::{Album, Source};
use serde::Deserialize;
use serde_json::Value;

/// `GET /songs?ids=` and `GET /songs/search`
#[derive(Debug, Deserialize)]
pub struct SongsResponse {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// `GET /songs/count`
#[derive(Debug, Deserialize)]
pub struct CountResponse {
    pub total: u64,
}

/// `GET /meta/search`
#[derive(Debug, Default, Deserialize)]
pub struct MetaSearchResponse {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub albums: Vec<Album>,
}

/// One entry of `GET /langpack/index`
#[derive(Debug, Clone, Deserialize)]
pub struct LanguagePack {
    pub lang: String,
    #[serde(default)]
    pub songs: u64,
}

#[derive(Debug, Deserialize)]
pub struct LanguageIndexResponse {
    #[serde(default)]
    pub languages: Vec<LanguagePack>,
}
