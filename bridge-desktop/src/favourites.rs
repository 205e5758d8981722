//! In-process favourites store

use bridge_traits::favourites::FavouritesStore;
use std::collections::HashSet;
use std::sync::RwLock;

/// Favourites held in memory.
///
/// Desktop hosts that sync favourites elsewhere push the current set in with
/// [`replace`](Self::replace); lookups never block on I/O.
#[derive(Debug, Default)]
pub struct MemoryFavouritesStore {
    ids: RwLock<HashSet<i64>>,
}

impl MemoryFavouritesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: RwLock::new(ids.into_iter().collect()),
        }
    }

    pub fn set(&self, song_id: i64, favourite: bool) {
        let Ok(mut ids) = self.ids.write() else {
            return;
        };
        if favourite {
            ids.insert(song_id);
        } else {
            ids.remove(&song_id);
        }
    }

    pub fn replace(&self, ids: impl IntoIterator<Item = i64>) {
        if let Ok(mut guard) = self.ids.write() {
            *guard = ids.into_iter().collect();
        }
    }
}

impl FavouritesStore for MemoryFavouritesStore {
    fn get_favourite(&self, song_id: i64) -> bool {
        self.ids
            .read()
            .map(|ids| ids.contains(&song_id))
            .unwrap_or(false)
    }

    fn get_favourites(&self) -> HashSet<i64> {
        self.ids.read().map(|ids| ids.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_query() {
        let store = MemoryFavouritesStore::with_ids([3, 5]);
        assert!(store.get_favourite(3));
        assert!(!store.get_favourite(4));

        store.set(4, true);
        store.set(3, false);
        assert_eq!(store.get_favourites(), HashSet::from([4, 5]));

        store.replace([9]);
        assert_eq!(store.get_favourites(), HashSet::from([9]));
    }
}
