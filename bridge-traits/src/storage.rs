//! Storage Abstractions
//!
//! Key-value settings persisted by the host outside the song database. The
//! song store keeps its schema-version mirror, the per-language last-update
//! map and the query-latency average here so they survive a destructive
//! rebuild of the relational store.

use async_trait::async_trait;

use crate::error::Result;

/// Key-value settings storage trait
///
/// Platform implementations:
/// - **Desktop**: SQLite database
/// - **Tests**: in-memory SQLite
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember_version(store: &dyn SettingsStore) -> Result<()> {
///     store.set_i64("db_schema_version", 7).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Store a float value
    async fn set_f64(&self, key: &str, value: f64) -> Result<()>;

    /// Retrieve a float value
    async fn get_f64(&self, key: &str) -> Result<Option<f64>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }
}
