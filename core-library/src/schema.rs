//! Relational schema, capability probing and the schema-version marker.
//!
//! The physical schema depends on what the engine accepts at runtime. Every
//! optional feature is detected by creating and dropping a trial object; a
//! failed trial simply means the feature is absent.

use bridge_traits::database::{DatabaseDriver, Statement, TxMode};
use bridge_traits::storage::SettingsStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{LibraryError, Result};

/// Bump whenever any DDL below changes
pub const SCHEMA_VERSION: i64 = 3;

/// Settings key mirroring the version for pre-flight comparison
pub const SCHEMA_VERSION_KEY: &str = "db_schema_version";

/// Full-text virtual table name
pub const FTS_TABLE: &str = "songs_fts";

/// Full-text index flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FtsVariant {
    Fts5,
    Fts4,
}

impl FtsVariant {
    pub fn module(&self) -> &'static str {
        match self {
            FtsVariant::Fts5 => "fts5",
            FtsVariant::Fts4 => "fts4",
        }
    }

    /// Prefix-match term for one normalized token
    pub fn prefix_term(&self, token: &str) -> String {
        match self {
            FtsVariant::Fts5 => format!("\"{}\"*", token),
            FtsVariant::Fts4 => format!("\"{}*\"", token),
        }
    }
}

/// Engine features detected at initialization, fixed for the store's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub without_rowid: bool,
    pub fts: Option<FtsVariant>,
}

impl Capabilities {
    /// No optional features; the baseline every engine supports
    pub fn minimal() -> Self {
        Self::default()
    }

    fn table_suffix(&self) -> &'static str {
        if self.without_rowid {
            " WITHOUT ROWID"
        } else {
            ""
        }
    }
}

/// Probe rowid-less tables, then FTS5, then FTS4.
#[instrument(skip(driver), fields(driver = driver.name()))]
pub async fn probe_capabilities(driver: &dyn DatabaseDriver) -> Capabilities {
    let without_rowid = driver
        .probe(vec![
            Statement::bare("CREATE TABLE _probe_rowid (id INTEGER PRIMARY KEY) WITHOUT ROWID"),
            Statement::bare("DROP TABLE _probe_rowid"),
        ])
        .await;

    let mut fts = None;
    for variant in [FtsVariant::Fts5, FtsVariant::Fts4] {
        let accepted = driver
            .probe(vec![
                Statement::bare(format!(
                    "CREATE VIRTUAL TABLE _probe_fts USING {}(body)",
                    variant.module()
                )),
                Statement::bare("DROP TABLE _probe_fts"),
            ])
            .await;
        if accepted {
            fts = Some(variant);
            break;
        }
    }

    let caps = Capabilities { without_rowid, fts };
    info!(?caps, "Probed engine capabilities");
    caps
}

/// DDL for the whole schema under the given capabilities
pub fn create_statements(caps: &Capabilities) -> Vec<Statement> {
    let suffix = caps.table_suffix();
    let mut ddl = vec![
        "CREATE TABLE version (version INTEGER NOT NULL)".to_string(),
        "CREATE TABLE songs (
            id INTEGER PRIMARY KEY,
            lang TEXT NOT NULL,
            title TEXT NOT NULL,
            source_title TEXT,
            songxml TEXT NOT NULL DEFAULT '',
            songkey TEXT,
            capo INTEGER,
            usage INTEGER NOT NULL DEFAULT 0,
            rating REAL NOT NULL DEFAULT 0,
            recent INTEGER NOT NULL DEFAULT 0,
            is_original INTEGER NOT NULL DEFAULT 0,
            copyright_restricted INTEGER NOT NULL DEFAULT 0,
            has_chord INTEGER NOT NULL DEFAULT 0,
            has_sheet INTEGER NOT NULL DEFAULT 0,
            has_mp3 INTEGER NOT NULL DEFAULT 0,
            favourite INTEGER NOT NULL DEFAULT 0,
            sort_title TEXT NOT NULL,
            search_title TEXT NOT NULL,
            search_alternative_titles TEXT NOT NULL DEFAULT '',
            search_text TEXT NOT NULL DEFAULT '',
            search_meta TEXT NOT NULL DEFAULT '',
            files TEXT NOT NULL DEFAULT '[]',
            alternative_titles TEXT NOT NULL DEFAULT '[]',
            related_songs TEXT NOT NULL DEFAULT '[]',
            info TEXT NOT NULL DEFAULT '[]'
        )"
        .to_string(),
        "CREATE INDEX idx_songs_lang ON songs(lang)".to_string(),
        "CREATE INDEX idx_songs_sort_title ON songs(sort_title)".to_string(),
        "CREATE INDEX idx_songs_usage ON songs(usage)".to_string(),
        format!(
            "CREATE TABLE song_source (
                song_id INTEGER NOT NULL,
                source_id INTEGER NOT NULL,
                number INTEGER,
                PRIMARY KEY (song_id, source_id)
            ){}",
            suffix
        ),
        "CREATE INDEX idx_song_source_source ON song_source(source_id, number)".to_string(),
        format!(
            "CREATE TABLE song_tags (
                song_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (song_id, tag_id)
            ){}",
            suffix
        ),
        "CREATE INDEX idx_song_tags_tag ON song_tags(tag_id)".to_string(),
        format!(
            "CREATE TABLE song_albums (
                song_id INTEGER NOT NULL,
                album_id INTEGER NOT NULL,
                track INTEGER,
                PRIMARY KEY (song_id, album_id)
            ){}",
            suffix
        ),
        "CREATE INDEX idx_song_albums_album ON song_albums(album_id, track)".to_string(),
        "CREATE TABLE sources (
            id INTEGER PRIMARY KEY,
            lang TEXT,
            name TEXT NOT NULL,
            abbreviation TEXT,
            song_count INTEGER,
            search_text TEXT NOT NULL DEFAULT ''
        )"
        .to_string(),
        "CREATE TABLE albums (
            id INTEGER PRIMARY KEY,
            lang TEXT,
            title TEXT NOT NULL,
            search_text TEXT NOT NULL DEFAULT ''
        )"
        .to_string(),
    ];

    if let Some(variant) = caps.fts {
        ddl.push(format!(
            "CREATE VIRTUAL TABLE {} USING {}(title, alternative_titles, body, meta)",
            FTS_TABLE,
            variant.module()
        ));
    }

    ddl.into_iter().map(Statement::bare).collect()
}

/// Drops every object [`create_statements`] can create
pub fn drop_statements() -> Vec<Statement> {
    [
        FTS_TABLE,
        "song_albums",
        "song_tags",
        "song_source",
        "albums",
        "sources",
        "songs",
        "version",
    ]
    .iter()
    .map(|table| Statement::bare(format!("DROP TABLE IF EXISTS {}", table)))
    .collect()
}

/// Result of [`SchemaManager::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaState {
    pub caps: Capabilities,
    /// The schema was dropped and recreated; caller must reseed
    pub rebuilt: bool,
}

/// Owns schema setup and the version marker
pub struct SchemaManager {
    driver: Arc<dyn DatabaseDriver>,
    settings: Arc<dyn SettingsStore>,
}

impl SchemaManager {
    pub fn new(driver: Arc<dyn DatabaseDriver>, settings: Arc<dyn SettingsStore>) -> Self {
        Self { driver, settings }
    }

    /// Probe capabilities and make sure the schema matches [`SCHEMA_VERSION`].
    ///
    /// `expected_languages` is how many languages the caller believes are
    /// loaded; an empty songs table in that case is treated like a version
    /// mismatch.
    #[instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn initialize(&self, expected_languages: usize) -> Result<SchemaState> {
        let caps = probe_capabilities(self.driver.as_ref()).await;

        match self.check(expected_languages).await {
            Ok(()) => {
                debug!(version = SCHEMA_VERSION, "Schema is current");
                Ok(SchemaState {
                    caps,
                    rebuilt: false,
                })
            }
            Err(e) if e.requires_rebuild() => {
                warn!(error = %e, "Rebuilding song store schema");
                self.rebuild(&caps).await?;
                Ok(SchemaState {
                    caps,
                    rebuilt: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Compare stored and mirrored versions, then check for an empty store
    async fn check(&self, expected_languages: usize) -> Result<()> {
        let mirrored = self.settings.get_i64(SCHEMA_VERSION_KEY).await?;
        let stored = self.stored_version().await?;

        if stored != Some(SCHEMA_VERSION) || mirrored != Some(SCHEMA_VERSION) {
            return Err(LibraryError::SchemaMismatch {
                found: stored,
                expected: SCHEMA_VERSION,
            });
        }

        if expected_languages > 0 {
            let rows = self
                .driver
                .execute_one("SELECT EXISTS (SELECT 1 FROM songs) AS present", &[])
                .await?;
            let present = rows
                .first()
                .and_then(|row| row.get("present"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !present {
                return Err(LibraryError::EmptyStore { expected_languages });
            }
        }

        Ok(())
    }

    async fn stored_version(&self) -> Result<Option<i64>> {
        let tables = self
            .driver
            .execute_one(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'version'",
                &[],
            )
            .await?;
        if tables.is_empty() {
            return Ok(None);
        }

        let rows = self
            .driver
            .execute_one("SELECT version FROM version LIMIT 1", &[])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("version"))
            .and_then(|v| v.as_i64()))
    }

    /// Drop and recreate everything in one write transaction.
    pub async fn rebuild(&self, caps: &Capabilities) -> Result<()> {
        let mut batch = drop_statements();
        batch.extend(create_statements(caps));
        batch.push(Statement::new(
            "INSERT INTO version (version) VALUES (?)",
            vec![SCHEMA_VERSION.into()],
        ));

        self.driver.transaction(batch, TxMode::ReadWrite).await?;
        self.settings
            .set_i64(SCHEMA_VERSION_KEY, SCHEMA_VERSION)
            .await?;

        info!(version = SCHEMA_VERSION, fts = ?caps.fts, "Schema rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_follows_capabilities() {
        let full = Capabilities {
            without_rowid: true,
            fts: Some(FtsVariant::Fts5),
        };
        let ddl: Vec<String> = create_statements(&full).into_iter().map(|s| s.sql).collect();
        assert!(ddl.iter().any(|s| s.contains("USING fts5")));
        assert_eq!(ddl.iter().filter(|s| s.ends_with("WITHOUT ROWID")).count(), 3);

        let minimal: Vec<String> = create_statements(&Capabilities::minimal())
            .into_iter()
            .map(|s| s.sql)
            .collect();
        assert!(!minimal.iter().any(|s| s.contains(FTS_TABLE)));
        assert!(!minimal.iter().any(|s| s.contains("WITHOUT ROWID")));
    }

    #[test]
    fn test_prefix_terms() {
        assert_eq!(FtsVariant::Fts5.prefix_term("sil"), "\"sil\"*");
        assert_eq!(FtsVariant::Fts4.prefix_term("sil"), "\"sil*\"");
    }

    #[test]
    fn test_drop_covers_every_table() {
        let drops: Vec<String> = drop_statements().into_iter().map(|s| s.sql).collect();
        for table in ["songs", "song_source", "song_tags", "song_albums", "sources", "albums", "version", FTS_TABLE] {
            assert!(drops.iter().any(|s| s.ends_with(&format!(" {}", table))), "{}", table);
        }
    }
}
