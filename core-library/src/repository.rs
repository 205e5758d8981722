//! Song repository
//!
//! All reads and writes the store performs go through here, expressed as
//! statement batches on the active [`DatabaseDriver`]. Detail assembly reads
//! songs and their three join tables in one read transaction.

use bridge_traits::database::{DatabaseDriver, QueryRow, QueryValue, Statement, TxMode};
use bridge_traits::get_column;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::import::{self, placeholders, MAX_PARAMS};
use crate::models::{
    Album, LanguageCounts, MetaFilter, MetaResult, Song, SongAlbumRef, SongFile, SongSourceRef,
    Source,
};
use crate::pagination::PageRequest;
use crate::query::QuerySpec;
use crate::schema::Capabilities;
use crate::text;

/// Rows per meta search category when the filter sets no limit
pub const DEFAULT_META_LIMIT: usize = 50;

const SONG_SELECT: &str = "SELECT id, lang, title, source_title, songxml, songkey, capo, usage, \
     rating, recent, is_original, copyright_restricted, has_chord, has_sheet, has_mp3, favourite, \
     files, alternative_titles, related_songs, info FROM songs";

fn json_column<T: serde::de::DeserializeOwned + Default>(row: &QueryRow, column: &str) -> Result<T> {
    match row.get(column).and_then(|v| v.as_str()) {
        Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(raw)?),
        _ => Ok(T::default()),
    }
}

fn song_from_row(row: &QueryRow) -> Result<Song> {
    Ok(Song {
        id: get_column!(row, "id", i64),
        lang: get_column!(row, "lang", String),
        title: get_column!(row, "title", String),
        source_title: get_column!(row, "source_title", Option<String>),
        songxml: get_column!(row, "songxml", Option<String>).unwrap_or_default(),
        songkey: get_column!(row, "songkey", Option<String>),
        capo: get_column!(row, "capo", Option<i64>),
        usage: get_column!(row, "usage", Option<i64>).unwrap_or_default(),
        rating: row.get("rating").and_then(|v| v.as_f64()).unwrap_or_default(),
        recent: get_column!(row, "recent", Option<i64>).unwrap_or_default(),
        is_original: get_column!(row, "is_original", bool),
        copyright_restricted: get_column!(row, "copyright_restricted", bool),
        has_chord: get_column!(row, "has_chord", bool),
        has_sheet: get_column!(row, "has_sheet", bool),
        has_mp3: get_column!(row, "has_mp3", bool),
        favourite: get_column!(row, "favourite", bool),
        files: json_column::<Vec<SongFile>>(row, "files")?,
        alternative_titles: json_column(row, "alternative_titles")?,
        related_songs: json_column(row, "related_songs")?,
        info: json_column(row, "info")?,
        ..Default::default()
    })
}

fn source_from_row(row: &QueryRow) -> Result<Source> {
    Ok(Source {
        id: get_column!(row, "id", i64),
        lang: get_column!(row, "lang", Option<String>),
        name: get_column!(row, "name", String),
        abbreviation: get_column!(row, "abbreviation", Option<String>),
        song_count: get_column!(row, "song_count", Option<i64>),
    })
}

fn album_from_row(row: &QueryRow) -> Result<Album> {
    Ok(Album {
        id: get_column!(row, "id", i64),
        lang: get_column!(row, "lang", Option<String>),
        title: get_column!(row, "title", String),
    })
}

fn id_params(ids: &[i64]) -> Vec<QueryValue> {
    ids.iter().map(|&id| QueryValue::from(id)).collect()
}

/// Data access over the relational song schema
pub struct SongRepository {
    driver: Arc<dyn DatabaseDriver>,
    caps: Capabilities,
}

impl SongRepository {
    pub fn new(driver: Arc<dyn DatabaseDriver>, caps: Capabilities) -> Self {
        Self { driver, caps }
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Full songs for `ids`, in the requested order; unknown ids are skipped.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn get_songs_by_ids(&self, ids: &[i64]) -> Result<Vec<Song>> {
        let mut found: HashMap<i64, Song> = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_PARAMS) {
            let marks = placeholders(chunk.len());
            let batch = vec![
                Statement::new(format!("{} WHERE id IN ({})", SONG_SELECT, marks), id_params(chunk)),
                Statement::new(
                    format!(
                        "SELECT ss.song_id, ss.source_id, ss.number, s.name, s.abbreviation \
                         FROM song_source ss LEFT JOIN sources s ON s.id = ss.source_id \
                         WHERE ss.song_id IN ({}) ORDER BY ss.song_id, ss.source_id",
                        marks
                    ),
                    id_params(chunk),
                ),
                Statement::new(
                    format!(
                        "SELECT song_id, tag_id FROM song_tags WHERE song_id IN ({}) \
                         ORDER BY song_id, tag_id",
                        marks
                    ),
                    id_params(chunk),
                ),
                Statement::new(
                    format!(
                        "SELECT sa.song_id, sa.album_id, sa.track, a.title \
                         FROM song_albums sa LEFT JOIN albums a ON a.id = sa.album_id \
                         WHERE sa.song_id IN ({}) ORDER BY sa.song_id, sa.album_id",
                        marks
                    ),
                    id_params(chunk),
                ),
            ];

            let mut results = self.driver.transaction(batch, TxMode::ReadOnly).await?.into_iter();
            let songs = results.next().unwrap_or_default();
            let sources = results.next().unwrap_or_default();
            let tags = results.next().unwrap_or_default();
            let albums = results.next().unwrap_or_default();

            for row in &songs {
                let song = song_from_row(row)?;
                found.insert(song.id, song);
            }
            for row in &sources {
                let song_id = get_column!(row, "song_id", i64);
                if let Some(song) = found.get_mut(&song_id) {
                    song.sources.push(SongSourceRef {
                        id: get_column!(row, "source_id", i64),
                        number: get_column!(row, "number", Option<i64>),
                        name: get_column!(row, "name", Option<String>),
                        abbreviation: get_column!(row, "abbreviation", Option<String>),
                    });
                }
            }
            for row in &tags {
                let song_id = get_column!(row, "song_id", i64);
                if let Some(song) = found.get_mut(&song_id) {
                    song.tags.push(get_column!(row, "tag_id", i64));
                }
            }
            for row in &albums {
                let song_id = get_column!(row, "song_id", i64);
                if let Some(song) = found.get_mut(&song_id) {
                    song.albums.push(SongAlbumRef {
                        id: get_column!(row, "album_id", i64),
                        track: get_column!(row, "track", Option<i64>),
                        title: get_column!(row, "title", Option<String>),
                    });
                }
            }
        }

        debug!(found = found.len(), "Assembled song details");
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    pub async fn get_song(&self, id: i64) -> Result<Option<Song>> {
        Ok(self.get_songs_by_ids(&[id]).await?.into_iter().next())
    }

    /// One page of ids matching `spec`
    pub async fn search_ids(&self, spec: &QuerySpec, page: PageRequest) -> Result<Vec<i64>> {
        let statement = spec.select_ids(page);
        let rows = self
            .driver
            .execute_one(&statement.sql, &statement.params)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("id").and_then(|v| v.as_i64()))
            .collect())
    }

    pub async fn count(&self, spec: &QuerySpec) -> Result<u64> {
        let statement = spec.count();
        let rows = self
            .driver
            .execute_one(&statement.sql, &statement.params)
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u64)
    }

    /// Sources and albums whose normalized text contains the search, word-prefix matches first
    pub async fn search_meta(&self, filter: &MetaFilter) -> Result<MetaResult> {
        let needle = text::normalize(&filter.search);
        let limit = filter.limit.unwrap_or(DEFAULT_META_LIMIT) as i64;

        let mut conditions = vec!["search_text LIKE ?"];
        let mut params: Vec<QueryValue> = vec![format!("%{}%", needle).into()];
        if let Some(lang) = &filter.lang {
            conditions.push("lang = ?");
            params.push(lang.clone().into());
        }
        params.push(format!("{}%", needle).into());
        params.push(format!("% {}%", needle).into());
        params.push(limit.into());

        let order = "ORDER BY CASE WHEN search_text LIKE ? THEN 0 WHEN search_text LIKE ? THEN 1 ELSE 2 END";
        let where_clause = conditions.join(" AND ");
        let batch = vec![
            Statement::new(
                format!(
                    "SELECT id, lang, name, abbreviation, song_count FROM sources WHERE {} {}, name, id LIMIT ?",
                    where_clause, order
                ),
                params.clone(),
            ),
            Statement::new(
                format!(
                    "SELECT id, lang, title FROM albums WHERE {} {}, title, id LIMIT ?",
                    where_clause, order
                ),
                params,
            ),
        ];

        let mut results = self.driver.transaction(batch, TxMode::ReadOnly).await?.into_iter();
        let sources = results
            .next()
            .unwrap_or_default()
            .iter()
            .map(source_from_row)
            .collect::<Result<Vec<_>>>()?;
        let albums = results
            .next()
            .unwrap_or_default()
            .iter()
            .map(album_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(MetaResult { sources, albums })
    }

    /// Song count per loaded language
    pub async fn loaded_languages(&self) -> Result<LanguageCounts> {
        let rows = self
            .driver
            .execute_one("SELECT lang, COUNT(*) AS total FROM songs GROUP BY lang", &[])
            .await?;

        let mut counts = LanguageCounts::new();
        for row in &rows {
            counts.insert(
                get_column!(row, "lang", String),
                get_column!(row, "total", i64) as u64,
            );
        }
        Ok(counts)
    }

    /// Ids currently stored for one language
    pub async fn language_song_ids(&self, lang: &str) -> Result<HashSet<i64>> {
        let rows = self
            .driver
            .execute_one("SELECT id FROM songs WHERE lang = ?", &[lang.into()])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("id").and_then(|v| v.as_i64()))
            .collect())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Upsert `songs` in one write transaction
    pub async fn import_batch(&self, songs: &[Song], favourites: &HashSet<i64>) -> Result<()> {
        if songs.is_empty() {
            return Ok(());
        }
        let batch = import::import_statements(songs, favourites, &self.caps)?;
        self.driver.transaction(batch, TxMode::ReadWrite).await?;
        Ok(())
    }

    /// Upsert `songs` through the driver's bulk path
    pub async fn bulk_import(&self, songs: &[Song], favourites: &HashSet<i64>) -> Result<()> {
        if songs.is_empty() {
            return Ok(());
        }
        let batch = import::import_statements(songs, favourites, &self.caps)?;
        self.driver.bulk_insert(batch).await?;
        Ok(())
    }

    pub async fn delete_songs(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let batch = import::delete_statements(ids, &self.caps);
        self.driver.transaction(batch, TxMode::ReadWrite).await?;
        Ok(())
    }

    pub async fn replace_meta(&self, sources: &[Source], albums: &[Album]) -> Result<()> {
        let batch = import::meta_statements(sources, albums);
        self.driver.transaction(batch, TxMode::ReadWrite).await?;
        Ok(())
    }

    /// Mirror a favourite flag; returns whether the song is stored locally
    pub async fn set_favourite(&self, id: i64, favourite: bool) -> Result<bool> {
        let results = self
            .driver
            .transaction(
                vec![
                    Statement::new(
                        "UPDATE songs SET favourite = ? WHERE id = ?",
                        vec![favourite.into(), id.into()],
                    ),
                    Statement::bare("SELECT changes() AS changed"),
                ],
                TxMode::ReadWrite,
            )
            .await?;

        Ok(results
            .get(1)
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("changed"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteSyncDriver;
    use crate::models::SongSourceRef;
    use crate::query::SongFilter;
    use crate::schema::{create_statements, FtsVariant};

    async fn repository() -> SongRepository {
        let driver: Arc<dyn DatabaseDriver> = Arc::new(SqliteSyncDriver::open_in_memory().unwrap());
        let caps = Capabilities {
            without_rowid: true,
            fts: Some(FtsVariant::Fts5),
        };
        driver
            .transaction(create_statements(&caps), TxMode::ReadWrite)
            .await
            .unwrap();
        SongRepository::new(driver, caps)
    }

    fn song(id: i64, lang: &str, title: &str) -> Song {
        Song {
            id,
            lang: lang.into(),
            title: title.into(),
            songxml: format!("<verse>{} lyrics</verse>", title),
            sources: vec![SongSourceRef {
                id: 1,
                number: Some(id * 10),
                name: None,
                abbreviation: None,
            }],
            tags: vec![id % 2],
            files: vec![SongFile {
                kind: "mp3".into(),
                path: format!("{}.mp3", id),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_songs_keeps_requested_order() {
        let repo = repository().await;
        repo.replace_meta(
            &[Source {
                id: 1,
                lang: Some("en".into()),
                name: "Hymns of Praise".into(),
                abbreviation: Some("HP".into()),
                song_count: Some(2),
            }],
            &[],
        )
        .await
        .unwrap();
        repo.import_batch(
            &[song(1, "en", "Amazing Grace"), song(2, "en", "Silent Night")],
            &HashSet::from([2]),
        )
        .await
        .unwrap();

        let songs = repo.get_songs_by_ids(&[2, 99, 1]).await.unwrap();
        assert_eq!(songs.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 1]);
        assert!(songs[0].favourite);
        assert_eq!(songs[0].sources[0].number, Some(20));
        assert_eq!(songs[0].sources[0].abbreviation.as_deref(), Some("HP"));
        assert_eq!(songs[1].files[0].path, "1.mp3");
        assert_eq!(songs[1].tags, vec![1]);
    }

    #[tokio::test]
    async fn test_reimport_replaces_relations() {
        let repo = repository().await;
        repo.import_batch(&[song(1, "en", "Amazing Grace")], &HashSet::new())
            .await
            .unwrap();

        let mut changed = song(1, "en", "Amazing Grace");
        changed.tags = vec![7, 8];
        repo.import_batch(&[changed], &HashSet::new()).await.unwrap();

        let stored = repo.get_song(1).await.unwrap().unwrap();
        assert_eq!(stored.tags, vec![7, 8]);
        assert_eq!(repo.loaded_languages().await.unwrap().get("en"), Some(&1));
    }

    #[tokio::test]
    async fn test_search_and_count() {
        let repo = repository().await;
        repo.import_batch(
            &[
                song(1, "en", "Silent Night"),
                song(2, "en", "Silver Bells"),
                song(3, "tr", "Sessiz Gece"),
            ],
            &HashSet::new(),
        )
        .await
        .unwrap();

        let spec = QuerySpec::compile(&SongFilter::new().search("sil*nt"), &repo.capabilities());
        assert_eq!(repo.search_ids(&spec, PageRequest::default()).await.unwrap(), vec![1]);
        assert_eq!(repo.count(&spec).await.unwrap(), 1);

        let spec = QuerySpec::compile(&SongFilter::new().search("sil"), &repo.capabilities());
        assert_eq!(repo.count(&spec).await.unwrap(), 2);

        let spec = QuerySpec::compile(&SongFilter::new().lang("tr"), &repo.capabilities());
        assert_eq!(repo.search_ids(&spec, PageRequest::default()).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_delete_and_favourite() {
        let repo = repository().await;
        repo.import_batch(&[song(1, "en", "A"), song(2, "en", "B")], &HashSet::new())
            .await
            .unwrap();

        assert!(repo.set_favourite(2, true).await.unwrap());
        assert!(!repo.set_favourite(42, true).await.unwrap());

        repo.delete_songs(&[1]).await.unwrap();
        assert_eq!(repo.language_song_ids("en").await.unwrap(), HashSet::from([2]));
        assert!(repo.get_song(2).await.unwrap().unwrap().favourite);
    }

    #[tokio::test]
    async fn test_search_meta() {
        let repo = repository().await;
        repo.replace_meta(
            &[
                Source {
                    id: 1,
                    lang: Some("en".into()),
                    name: "Songs of Fellowship".into(),
                    abbreviation: Some("SOF".into()),
                    song_count: None,
                },
                Source {
                    id: 2,
                    lang: Some("tr".into()),
                    name: "Fellowship İlahileri".into(),
                    abbreviation: None,
                    song_count: None,
                },
            ],
            &[Album {
                id: 5,
                lang: Some("en".into()),
                title: "Fellowship Live".into(),
            }],
        )
        .await
        .unwrap();

        let result = repo.search_meta(&MetaFilter::new("fellow")).await.unwrap();
        // Prefix matches rank first
        assert_eq!(result.sources.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(result.albums.len(), 1);

        let result = repo
            .search_meta(&MetaFilter::new("fellow").lang("en"))
            .await
            .unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].abbreviation.as_deref(), Some("SOF"));
    }
}
