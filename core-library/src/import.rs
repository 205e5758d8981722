//! Row upsert statement builders.
//!
//! One `INSERT OR REPLACE` per song carries every scalar column plus the
//! JSON-encoded list columns. Join tables and the full-text index are
//! written with multi-row inserts, after the batch's previous join rows are
//! cleared so a re-import never leaves stale memberships behind.

use bridge_traits::database::{QueryValue, Statement};
use std::collections::HashSet;

use crate::error::Result;
use crate::models::{Album, Song, Source};
use crate::schema::{Capabilities, FTS_TABLE};

/// Upper bound on bound parameters per statement
pub const MAX_PARAMS: usize = 900;

const SONG_COLUMNS: &[&str] = &[
    "id",
    "lang",
    "title",
    "source_title",
    "songxml",
    "songkey",
    "capo",
    "usage",
    "rating",
    "recent",
    "is_original",
    "copyright_restricted",
    "has_chord",
    "has_sheet",
    "has_mp3",
    "favourite",
    "sort_title",
    "search_title",
    "search_alternative_titles",
    "search_text",
    "search_meta",
    "files",
    "alternative_titles",
    "related_songs",
    "info",
];

/// `?, ?, ?` repeated for `count` placeholders
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// `DELETE ... WHERE column IN (...)` over `ids`, split to respect [`MAX_PARAMS`]
pub(crate) fn delete_in(table: &str, column: &str, ids: &[i64]) -> Vec<Statement> {
    ids.chunks(MAX_PARAMS)
        .map(|chunk| {
            Statement::new(
                format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    table,
                    column,
                    placeholders(chunk.len())
                ),
                chunk.iter().map(|&id| QueryValue::from(id)).collect(),
            )
        })
        .collect()
}

/// Multi-row insert; each row must have `columns.len()` values
fn insert_rows(verb: &str, table: &str, columns: &[&str], rows: Vec<Vec<QueryValue>>) -> Vec<Statement> {
    let per_statement = (MAX_PARAMS / columns.len()).max(1);
    let row_sql = format!("({})", placeholders(columns.len()));

    rows.chunks(per_statement)
        .map(|chunk| {
            let sql = format!(
                "{} INTO {} ({}) VALUES {}",
                verb,
                table,
                columns.join(", "),
                vec![row_sql.as_str(); chunk.len()].join(", ")
            );
            Statement::new(sql, chunk.iter().flatten().cloned().collect())
        })
        .collect()
}

fn song_row(song: &Song, favourite: bool) -> Result<Vec<QueryValue>> {
    Ok(vec![
        song.id.into(),
        song.lang.as_str().into(),
        song.title.as_str().into(),
        song.source_title.clone().into(),
        song.songxml.as_str().into(),
        song.songkey.clone().into(),
        song.capo.into(),
        song.usage.into(),
        song.rating.into(),
        song.recent.into(),
        song.is_original.into(),
        song.copyright_restricted.into(),
        song.has_chord.into(),
        song.has_sheet.into(),
        song.has_mp3.into(),
        favourite.into(),
        song.sort_title().into(),
        song.search_title().into(),
        song.search_alternative_titles().into(),
        song.search_text().into(),
        song.search_meta().into(),
        serde_json::to_string(&song.files)?.into(),
        serde_json::to_string(&song.alternative_titles)?.into(),
        serde_json::to_string(&song.related_songs)?.into(),
        serde_json::to_string(&song.info)?.into(),
    ])
}

/// Upsert of one song's scalar and JSON columns
pub fn song_upsert(song: &Song, favourite: bool) -> Result<Statement> {
    Ok(Statement::new(
        format!(
            "INSERT OR REPLACE INTO songs ({}) VALUES ({})",
            SONG_COLUMNS.join(", "),
            placeholders(SONG_COLUMNS.len())
        ),
        song_row(song, favourite)?,
    ))
}

/// Join-table and full-text rows of `ids`
pub fn clear_relations(ids: &[i64], caps: &Capabilities) -> Vec<Statement> {
    let mut batch = delete_in("song_source", "song_id", ids);
    batch.extend(delete_in("song_tags", "song_id", ids));
    batch.extend(delete_in("song_albums", "song_id", ids));
    if caps.fts.is_some() {
        batch.extend(delete_in(FTS_TABLE, "rowid", ids));
    }
    batch
}

/// Every statement needed to write `songs`, replacing whatever was stored under their ids.
pub fn import_statements(
    songs: &[Song],
    favourites: &HashSet<i64>,
    caps: &Capabilities,
) -> Result<Vec<Statement>> {
    let ids: Vec<i64> = songs.iter().map(|s| s.id).collect();
    let mut batch = clear_relations(&ids, caps);

    let mut sources: Vec<Vec<QueryValue>> = Vec::new();
    let mut tags: Vec<Vec<QueryValue>> = Vec::new();
    let mut albums: Vec<Vec<QueryValue>> = Vec::new();
    let mut fts: Vec<Vec<QueryValue>> = Vec::new();

    for song in songs {
        batch.push(song_upsert(song, favourites.contains(&song.id))?);

        for source in &song.sources {
            sources.push(vec![song.id.into(), source.id.into(), source.number.into()]);
        }
        for &tag in &song.tags {
            tags.push(vec![song.id.into(), tag.into()]);
        }
        for album in &song.albums {
            albums.push(vec![song.id.into(), album.id.into(), album.track.into()]);
        }
        if caps.fts.is_some() {
            fts.push(vec![
                song.id.into(),
                song.search_title().into(),
                song.search_alternative_titles().into(),
                song.search_text().into(),
                song.search_meta().into(),
            ]);
        }
    }

    batch.extend(insert_rows(
        "INSERT OR REPLACE",
        "song_source",
        &["song_id", "source_id", "number"],
        sources,
    ));
    batch.extend(insert_rows("INSERT OR IGNORE", "song_tags", &["song_id", "tag_id"], tags));
    batch.extend(insert_rows(
        "INSERT OR REPLACE",
        "song_albums",
        &["song_id", "album_id", "track"],
        albums,
    ));
    batch.extend(insert_rows(
        "INSERT",
        FTS_TABLE,
        &["rowid", "title", "alternative_titles", "body", "meta"],
        fts,
    ));

    Ok(batch)
}

/// Remove songs and everything hanging off them
pub fn delete_statements(ids: &[i64], caps: &Capabilities) -> Vec<Statement> {
    let mut batch = clear_relations(ids, caps);
    batch.extend(delete_in("songs", "id", ids));
    batch
}

/// Replace the whole source and album catalogue
pub fn meta_statements(sources: &[Source], albums: &[Album]) -> Vec<Statement> {
    let mut batch = vec![
        Statement::bare("DELETE FROM sources"),
        Statement::bare("DELETE FROM albums"),
    ];

    batch.extend(insert_rows(
        "INSERT OR REPLACE",
        "sources",
        &["id", "lang", "name", "abbreviation", "song_count", "search_text"],
        sources
            .iter()
            .map(|s| {
                vec![
                    s.id.into(),
                    s.lang.clone().into(),
                    s.name.as_str().into(),
                    s.abbreviation.clone().into(),
                    s.song_count.into(),
                    s.search_text().into(),
                ]
            })
            .collect(),
    ));

    batch.extend(insert_rows(
        "INSERT OR REPLACE",
        "albums",
        &["id", "lang", "title", "search_text"],
        albums
            .iter()
            .map(|a| {
                vec![
                    a.id.into(),
                    a.lang.clone().into(),
                    a.title.as_str().into(),
                    a.search_text().into(),
                ]
            })
            .collect(),
    ));

    batch
}
