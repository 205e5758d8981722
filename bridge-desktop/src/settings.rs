//! [`SettingsStore`] backed by its own SQLite file
//!
//! Lives apart from the song database: a destructive schema rebuild drops
//! `songs.db` but leaves the schema-version mirror, the last-update map and
//! the query-latency average in place.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    kind TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// Tag stored next to each value; reading a key back as another kind fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Int,
    Float,
}

impl Kind {
    fn tag(self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Int => "int",
            Kind::Float => "float",
        }
    }
}

fn db_error(action: &str, e: sqlx::Error) -> BridgeError {
    BridgeError::OperationFailed(format!("settings {}: {}", action, e))
}

pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Open or create the settings file, creating parent directories
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| db_error("open", e))?;

        debug!(path = %path.display(), "Opened settings store");
        Self::with_pool(pool).await
    }

    /// Private in-memory store; a single connection so every query sees
    /// the same database
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| db_error("open", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| db_error("open", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| db_error("create table", e))?;
        Ok(Self { pool })
    }

    async fn write(&self, key: &str, value: String, kind: Kind) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, kind, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, kind = excluded.kind, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(kind.tag())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("write", e))?;
        Ok(())
    }

    async fn read(&self, key: &str, kind: Kind) -> Result<Option<String>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT value, kind FROM settings WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("read", e))?;

        let Some((value, stored)) = row else {
            return Ok(None);
        };
        if stored != kind.tag() {
            warn!(key, stored = %stored, requested = kind.tag(), "Setting read as wrong kind");
            return Err(BridgeError::OperationFailed(format!(
                "setting '{}' is {}, not {}",
                key,
                stored,
                kind.tag()
            )));
        }
        Ok(Some(value))
    }

    async fn read_parsed<T: FromStr>(&self, key: &str, kind: Kind) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        self.read(key, kind)
            .await?
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    BridgeError::OperationFailed(format!("setting '{}' is corrupt: {}", key, e))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, value.to_owned(), Kind::Text).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.read(key, Kind::Text).await
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.write(key, value.to_string(), Kind::Int).await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.read_parsed(key, Kind::Int).await
    }

    async fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.write(key, value.to_string(), Kind::Float).await
    }

    async fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        self.read_parsed(key, Kind::Float).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete", e))?;
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("read", e))?;
        Ok(found.is_some())
    }
}
