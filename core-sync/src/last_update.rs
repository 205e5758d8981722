//! Per-language import timestamps
//!
//! Stored as one JSON object (`{"en": 1718000000, ...}`, unix seconds) under
//! [`LAST_UPDATE_KEY`] in the settings store. Imports of different languages
//! run concurrently, so every write re-reads the persisted map and merges a
//! single entry into it under a lock.

use bridge_traits::storage::SettingsStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::Result;

pub const LAST_UPDATE_KEY: &str = "_last_update_key";

pub struct LastUpdateMap {
    settings: Arc<dyn SettingsStore>,
    write_lock: Mutex<()>,
}

impl LastUpdateMap {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            write_lock: Mutex::new(()),
        }
    }

    /// Every recorded timestamp; an unreadable map counts as empty
    pub async fn all(&self) -> Result<BTreeMap<String, i64>> {
        let Some(raw) = self.settings.get_string(LAST_UPDATE_KEY).await? else {
            return Ok(BTreeMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable last-update map");
                Ok(BTreeMap::new())
            }
        }
    }

    pub async fn get(&self, language: &str) -> Result<Option<i64>> {
        Ok(self.all().await?.get(language).copied())
    }

    pub async fn touch(&self, language: &str, timestamp: i64) -> Result<()> {
        self.merge(language, Some(timestamp)).await
    }

    pub async fn clear(&self, language: &str) -> Result<()> {
        self.merge(language, None).await
    }

    /// Drop the whole map so every language counts as never imported
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.settings.delete(LAST_UPDATE_KEY).await?;
        Ok(())
    }

    async fn merge(&self, language: &str, timestamp: Option<i64>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.all().await?;
        match timestamp {
            Some(ts) => {
                map.insert(language.to_string(), ts);
            }
            None => {
                map.remove(language);
            }
        }
        let raw = serde_json::to_string(&map).map_err(core_library::LibraryError::from)?;
        self.settings.set_string(LAST_UPDATE_KEY, &raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::SqliteSettingsStore;
    use futures::future::join_all;

    async fn map() -> LastUpdateMap {
        LastUpdateMap::new(Arc::new(SqliteSettingsStore::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn test_touch_and_clear() {
        let map = map().await;
        map.touch("en", 100).await.unwrap();
        map.touch("tr", 200).await.unwrap();
        map.clear("en").await.unwrap();

        assert_eq!(map.get("en").await.unwrap(), None);
        assert_eq!(map.get("tr").await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_concurrent_touches_are_not_lost() {
        let map = map().await;
        let languages: Vec<String> = (0..16).map(|i| format!("l{}", i)).collect();

        for result in join_all(languages.iter().map(|l| map.touch(l, 1))).await {
            result.unwrap();
        }

        assert_eq!(map.all().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_reset_and_garbage() {
        let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        settings.set_string(LAST_UPDATE_KEY, "not json").await.unwrap();
        let map = LastUpdateMap::new(settings);

        assert!(map.all().await.unwrap().is_empty());
        map.touch("en", 5).await.unwrap();
        map.reset().await.unwrap();
        assert!(map.all().await.unwrap().is_empty());
    }
}
