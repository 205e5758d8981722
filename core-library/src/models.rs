//! Domain models for the song store
//!
//! Songs arrive from language partitions as JSON (optionally with shortened
//! keys), are stored relationally, and leave again through the query
//! contract. The same [`Song`] type serves all three.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::codec;
use crate::error::{LibraryError, Result};
use crate::text;

/// Reserved language code of the partition carrying sources and albums
pub const META_LANGUAGE: &str = "meta";

/// File kinds that count as sheet music
const SHEET_KINDS: &[&str] = &["sheet", "pdf", "musicxml"];

// =============================================================================
// Song
// =============================================================================

/// Attached media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongFile {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: String,
}

/// Membership of a song in a source (hymnal/songbook)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongSourceRef {
    pub id: i64,
    /// Song number within the source
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
}

/// Membership of a song in an album
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongAlbumRef {
    pub id: i64,
    #[serde(default)]
    pub track: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A song with everything the store knows about it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Song {
    pub id: i64,
    pub lang: String,
    pub title: String,
    pub source_title: Option<String>,
    /// Lyrics and chord markup
    pub songxml: String,
    pub songkey: Option<String>,
    pub capo: Option<i64>,
    pub usage: i64,
    pub rating: f64,
    pub recent: i64,
    #[serde(deserialize_with = "flag")]
    pub is_original: bool,
    #[serde(deserialize_with = "flag")]
    pub copyright_restricted: bool,

    // Derived at import time
    #[serde(deserialize_with = "flag")]
    pub has_chord: bool,
    #[serde(deserialize_with = "flag")]
    pub has_sheet: bool,
    #[serde(deserialize_with = "flag")]
    pub has_mp3: bool,

    /// Mirror of the favourites store
    #[serde(deserialize_with = "flag")]
    pub favourite: bool,

    pub files: Vec<SongFile>,
    pub alternative_titles: Vec<String>,
    pub related_songs: Vec<i64>,
    /// Free-form info entries, stored verbatim
    pub info: Vec<Value>,

    pub sources: Vec<SongSourceRef>,
    pub tags: Vec<i64>,
    pub albums: Vec<SongAlbumRef>,

    /// Placeholder for an id the store could not supply
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub not_loaded: bool,

    /// Canonical wire form, attached on request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<Value>,
}

/// Accepts JSON booleans as well as the 0/1 integers older dumps use
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.as_str(), "1" | "true"),
        _ => false,
    })
}

impl Song {
    /// Placeholder returned for ids the backend did not supply
    pub fn not_loaded(id: i64) -> Self {
        Self {
            id,
            not_loaded: true,
            ..Default::default()
        }
    }

    /// Parse one song object from a partition payload.
    pub fn from_wire(value: Value, compressed: bool) -> Result<Self> {
        let value = if compressed {
            codec::decompress(value)
        } else {
            value
        };
        let mut song: Song = serde_json::from_value(value)?;
        song.validate()?;
        song.derive_flags();
        Ok(song)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id <= 0 {
            return Err(LibraryError::InvalidInput {
                field: "id".to_string(),
                message: format!("Song id must be positive, got {}", self.id),
            });
        }

        if self.lang.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "lang".to_string(),
                message: format!("Song {} has no language", self.id),
            });
        }

        Ok(())
    }

    /// Recompute `has_chord`, `has_sheet` and `has_mp3` from the files and markup
    pub fn derive_flags(&mut self) {
        self.has_mp3 = self.files.iter().any(|f| f.kind.eq_ignore_ascii_case("mp3"));
        self.has_sheet = self
            .files
            .iter()
            .any(|f| SHEET_KINDS.iter().any(|k| f.kind.eq_ignore_ascii_case(k)));
        self.has_chord = text::has_chord_markup(&self.songxml)
            || self.files.iter().any(|f| f.kind.eq_ignore_ascii_case("chord"));
    }

    /// Alphabetic sort key
    pub fn sort_title(&self) -> String {
        text::normalize(&self.title)
    }

    pub fn search_title(&self) -> String {
        text::normalize(&self.title)
    }

    pub fn search_alternative_titles(&self) -> String {
        text::normalize(&self.alternative_titles.join(" "))
    }

    pub fn search_text(&self) -> String {
        text::normalize(&text::strip_markup(&self.songxml))
    }

    /// Source title plus every string found in the info entries
    pub fn search_meta(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(source_title) = &self.source_title {
            parts.push(source_title);
        }
        for entry in &self.info {
            collect_strings(entry, &mut parts);
        }
        text::normalize(&parts.join(" "))
    }

    /// Canonical wire form, with derived and local-only fields left out
    pub fn export(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), Value::from(self.id));
        obj.insert("lang".into(), Value::from(self.lang.clone()));
        obj.insert("title".into(), Value::from(self.title.clone()));
        if let Some(source_title) = &self.source_title {
            obj.insert("source_title".into(), Value::from(source_title.clone()));
        }
        obj.insert("songxml".into(), Value::from(self.songxml.clone()));
        if let Some(songkey) = &self.songkey {
            obj.insert("songkey".into(), Value::from(songkey.clone()));
        }
        if let Some(capo) = self.capo {
            obj.insert("capo".into(), Value::from(capo));
        }
        obj.insert("usage".into(), Value::from(self.usage));
        obj.insert("rating".into(), Value::from(self.rating));
        obj.insert("recent".into(), Value::from(self.recent));
        obj.insert("is_original".into(), Value::from(self.is_original));
        obj.insert(
            "copyright_restricted".into(),
            Value::from(self.copyright_restricted),
        );
        obj.insert("files".into(), serde_json::to_value(&self.files).unwrap_or_default());
        obj.insert(
            "alternative_titles".into(),
            Value::from(self.alternative_titles.clone()),
        );
        obj.insert("related_songs".into(), Value::from(self.related_songs.clone()));
        obj.insert("info".into(), Value::Array(self.info.clone()));
        obj.insert(
            "sources".into(),
            Value::Array(
                self.sources
                    .iter()
                    .map(|s| serde_json::json!({"id": s.id, "number": s.number}))
                    .collect(),
            ),
        );
        obj.insert("tags".into(), Value::from(self.tags.clone()));
        obj.insert(
            "albums".into(),
            Value::Array(
                self.albums
                    .iter()
                    .map(|a| serde_json::json!({"id": a.id, "track": a.track}))
                    .collect(),
            ),
        );
        Value::Object(obj)
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

// =============================================================================
// Meta entities
// =============================================================================

/// Hymnal or songbook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    #[serde(default)]
    pub lang: Option<String>,
    pub name: String,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub song_count: Option<i64>,
}

impl Source {
    pub fn search_text(&self) -> String {
        text::normalize(&format!(
            "{} {}",
            self.name,
            self.abbreviation.as_deref().unwrap_or_default()
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    #[serde(default)]
    pub lang: Option<String>,
    pub title: String,
}

impl Album {
    pub fn search_text(&self) -> String {
        text::normalize(&self.title)
    }
}

/// Filter for [`search_meta`](crate::contract::SongDatabase::search_meta)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFilter {
    /// Matched as a prefix of any word, or as a substring
    pub search: String,
    pub lang: Option<String>,
    pub limit: Option<usize>,
}

impl MetaFilter {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            ..Default::default()
        }
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaResult {
    pub sources: Vec<Source>,
    pub albums: Vec<Album>,
}

/// One page of songs plus the total match count when known
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub data: Vec<Song>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Loaded language code mapped to its song count
pub type LanguageCounts = BTreeMap<String, u64>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_wire_compressed() {
        let wire = json!({
            "i": 1471, "l": "en", "t": "Silent Night", "x": "<verse><chord>G</chord>Silent night</verse>",
            "k": "G", "u": 40, "o": 1,
            "f": [{"ty": "mp3", "p": "1471.mp3"}, {"ty": "pdf", "p": "1471.pdf"}],
            "s": [{"i": 2, "n": 120}], "tg": [5, 8], "al": [{"i": 3, "tr": 1}]
        });

        let song = Song::from_wire(wire, true).unwrap();
        assert_eq!(song.id, 1471);
        assert_eq!(song.lang, "en");
        assert!(song.is_original);
        assert!(song.has_chord && song.has_mp3 && song.has_sheet);
        assert_eq!(song.sources[0].number, Some(120));
        assert_eq!(song.tags, vec![5, 8]);
        assert_eq!(song.albums[0].track, Some(1));
    }

    #[test]
    fn test_from_wire_rejects_missing_id() {
        let err = Song::from_wire(json!({"lang": "en", "title": "x"}), false).unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput { field, .. } if field == "id"));
    }

    #[test]
    fn test_derived_flags_ignore_wire_values() {
        let song = Song::from_wire(
            json!({"id": 1, "lang": "tr", "title": "x", "has_mp3": true, "has_chord": 1}),
            false,
        )
        .unwrap();
        assert!(!song.has_mp3);
        assert!(!song.has_chord);
    }

    #[test]
    fn test_search_fields() {
        let song = Song {
            id: 2,
            lang: "en".into(),
            title: "O Holy Night!".into(),
            source_title: Some("Cantique de Noël".into()),
            songxml: "<verse>The stars are <chord>C</chord>brightly shining</verse>".into(),
            alternative_titles: vec!["Minuit, Chrétiens".into()],
            info: vec![json!({"composer": "Adolphe Adam", "year": 1847})],
            ..Default::default()
        };

        assert_eq!(song.sort_title(), "o holy night");
        assert_eq!(song.search_text(), "the stars are brightly shining");
        assert_eq!(song.search_alternative_titles(), "minuit chrétiens");
        assert_eq!(song.search_meta(), "cantique de noël adolphe adam");
    }

    #[test]
    fn test_export_round_trips_through_from_wire() {
        let song = Song::from_wire(
            json!({
                "id": 9, "lang": "en", "title": "Be Thou My Vision", "songxml": "<verse/>",
                "files": [{"type": "mp3", "path": "9.mp3"}], "tags": [1],
                "sources": [{"id": 4, "number": 7}]
            }),
            false,
        )
        .unwrap();

        let again = Song::from_wire(song.export(), false).unwrap();
        assert_eq!(again, song);

        let compressed = codec::compress(song.export());
        assert_eq!(Song::from_wire(compressed, true).unwrap(), song);
    }

    #[test]
    fn test_placeholder() {
        let song = Song::not_loaded(77);
        assert!(song.not_loaded);
        assert_eq!(song.id, 77);
        assert_eq!(serde_json::to_value(&song).unwrap()["not_loaded"], true);
    }
}
