//! Language partition payloads
//!
//! Ordinary languages ship `{ "data": [song, ...], "compressed": bool }`; the
//! reserved `meta` language ships `{ "song_source_info": [...], "albums": [...] }`.
//! With `compressed` set, every object inside those arrays uses the short
//! key alphabet and is expanded before any field is read.

use core_library::codec;
use core_library::models::{Album, Song, Source, META_LANGUAGE};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{Result, SyncError};

/// Parsed contents of one downloaded partition
#[derive(Debug, Clone, PartialEq)]
pub enum Partition {
    Songs(Vec<Song>),
    Meta {
        sources: Vec<Source>,
        albums: Vec<Album>,
    },
}

impl Partition {
    /// Number of rows the partition will write
    pub fn len(&self) -> usize {
        match self {
            Partition::Songs(songs) => songs.len(),
            Partition::Meta { sources, albums } => sources.len() + albums.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invalid(language: &str, reason: impl Into<String>) -> SyncError {
    SyncError::InvalidPartition {
        language: language.to_string(),
        reason: reason.into(),
    }
}

/// Top-level keys are normally canonical, but accept the short form as well
fn top_level<'a>(obj: &'a Map<String, Value>, canonical: &str) -> Option<&'a Value> {
    obj.get(canonical)
        .or_else(|| obj.get(codec::short_key(canonical)))
}

fn take_array(language: &str, obj: &mut Map<String, Value>, canonical: &str) -> Result<Vec<Value>> {
    let key = if obj.contains_key(canonical) {
        canonical.to_string()
    } else {
        codec::short_key(canonical).to_string()
    };
    match obj.remove(&key) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(invalid(
            language,
            format!("`{}` must be an array, got {}", canonical, other),
        )),
    }
}

fn parse_entities<T: DeserializeOwned>(language: &str, items: Vec<Value>, compressed: bool) -> Result<Vec<T>> {
    items
        .into_iter()
        .map(|item| {
            let item = if compressed { codec::decompress(item) } else { item };
            serde_json::from_value(item).map_err(|e| invalid(language, e.to_string()))
        })
        .collect()
}

/// Parse a downloaded partition body for `language`.
///
/// Songs without a language code take the partition's; songs tagged with a
/// different language reject the whole partition.
pub fn parse_partition(language: &str, body: &[u8]) -> Result<Partition> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| invalid(language, e.to_string()))?;
    let Value::Object(mut obj) = value else {
        return Err(invalid(language, "payload is not an object"));
    };

    let compressed = top_level(&obj, "compressed")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if language == META_LANGUAGE {
        let sources = take_array(language, &mut obj, "song_source_info")?;
        let albums = take_array(language, &mut obj, "albums")?;
        return Ok(Partition::Meta {
            sources: parse_entities(language, sources, compressed)?,
            albums: parse_entities(language, albums, compressed)?,
        });
    }

    let songs = take_array(language, &mut obj, "data")?
        .into_iter()
        .map(|item| {
            let mut item = if compressed { codec::decompress(item) } else { item };
            if let Value::Object(fields) = &mut item {
                fields
                    .entry("lang")
                    .or_insert_with(|| Value::from(language));
            }
            let song = Song::from_wire(item, false).map_err(|e| invalid(language, e.to_string()))?;
            if song.lang != language {
                return Err(invalid(
                    language,
                    format!("song {} belongs to {}", song.id, song.lang),
                ));
            }
            Ok(song)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Partition::Songs(songs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_songs() {
        let body = json!({
            "data": [
                {"id": 1, "title": "Amazing Grace", "songxml": "<chord>G</chord>Amazing"},
                {"id": 2, "lang": "en", "title": "Be Thou My Vision", "songxml": ""}
            ]
        });
        let partition = parse_partition("en", body.to_string().as_bytes()).unwrap();

        let Partition::Songs(songs) = partition else {
            panic!("expected songs");
        };
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].lang, "en");
        assert!(songs[0].has_chord);
        assert!(!songs[1].has_chord);
    }

    #[test]
    fn test_parse_compressed_songs() {
        let song = json!({"id": 9, "lang": "tr", "title": "Sessiz Gece", "songxml": "", "tags": [3]});
        let body = json!({"compressed": true, "data": [codec::compress(song)]});

        let Partition::Songs(songs) = parse_partition("tr", body.to_string().as_bytes()).unwrap() else {
            panic!("expected songs");
        };
        assert_eq!(songs[0].id, 9);
        assert_eq!(songs[0].title, "Sessiz Gece");
        assert_eq!(songs[0].tags, vec![3]);
    }

    #[test]
    fn test_parse_meta() {
        let source = codec::compress(json!({"id": 1, "name": "Hymns Ancient", "abbreviation": "HA"}));
        let body = json!({
            "compressed": true,
            "song_source_info": [source],
            "albums": [codec::compress(json!({"id": 4, "title": "Live"}))]
        });

        let partition = parse_partition(META_LANGUAGE, body.to_string().as_bytes()).unwrap();
        assert_eq!(partition.len(), 2);
        let Partition::Meta { sources, albums } = partition else {
            panic!("expected meta");
        };
        assert_eq!(sources[0].abbreviation.as_deref(), Some("HA"));
        assert_eq!(albums[0].title, "Live");
    }

    #[test]
    fn test_missing_data_is_empty_partition() {
        let partition = parse_partition("de", b"{}").unwrap();
        assert!(partition.is_empty());
    }

    #[test]
    fn test_rejects_foreign_language_and_garbage() {
        let body = json!({"data": [{"id": 1, "lang": "tr", "title": "x"}]});
        assert!(matches!(
            parse_partition("en", body.to_string().as_bytes()),
            Err(SyncError::InvalidPartition { .. })
        ));
        assert!(parse_partition("en", b"[1, 2]").is_err());
        assert!(parse_partition("en", b"{\"data\": 5}").is_err());
    }
}
