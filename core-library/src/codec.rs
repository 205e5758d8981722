//! Key-Decompression Codec
//!
//! Language partitions can be shipped with every object key shortened to save
//! bandwidth. This module maps between the short wire alphabet and canonical
//! field names. Everything here is pure; unknown keys pass through unchanged
//! so newer servers can add fields without breaking older clients.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

/// `(short, canonical)` pairs of the wire alphabet
const KEY_MAP: &[(&str, &str)] = &[
    ("i", "id"),
    ("l", "lang"),
    ("t", "title"),
    ("st", "source_title"),
    ("x", "songxml"),
    ("k", "songkey"),
    ("c", "capo"),
    ("u", "usage"),
    ("r", "rating"),
    ("re", "recent"),
    ("o", "is_original"),
    ("cr", "copyright_restricted"),
    ("f", "files"),
    ("ty", "type"),
    ("p", "path"),
    ("a", "alternative_titles"),
    ("rs", "related_songs"),
    ("in", "info"),
    ("s", "sources"),
    ("n", "number"),
    ("tg", "tags"),
    ("al", "albums"),
    ("tr", "track"),
    ("nm", "name"),
    ("ab", "abbreviation"),
    ("sc", "song_count"),
    ("d", "data"),
    ("ssi", "song_source_info"),
];

static TO_CANONICAL: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| KEY_MAP.iter().copied().collect());

static TO_SHORT: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| KEY_MAP.iter().map(|&(short, long)| (long, short)).collect());

/// Canonical name for a short key; unknown keys map to themselves
pub fn canonical_key(short: &str) -> &str {
    TO_CANONICAL.get(short).copied().unwrap_or(short)
}

/// Short wire name for a canonical key; unknown keys map to themselves
pub fn short_key(canonical: &str) -> &str {
    TO_SHORT.get(canonical).copied().unwrap_or(canonical)
}

/// Read `canonical` from `obj`, looking under its short key when `compressed`.
pub fn get_field<'a>(compressed: bool, obj: &'a Map<String, Value>, canonical: &str) -> Option<&'a Value> {
    if compressed {
        obj.get(short_key(canonical))
    } else {
        obj.get(canonical)
    }
}

/// Rename every object key from the short alphabet to canonical names, depth-first.
pub fn decompress(value: Value) -> Value {
    rename_keys(value, &|key| canonical_key(key).to_string())
}

/// Inverse of [`decompress`].
pub fn compress(value: Value) -> Value {
    rename_keys(value, &|key| short_key(key).to_string())
}

fn rename_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| (rename(&key), rename_keys(inner, rename)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|item| rename_keys(item, rename)).collect())
        }
        scalar => scalar,
    }
}
