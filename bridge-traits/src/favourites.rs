//! Favourites Store Contract
//!
//! The authoritative favourites list lives with the host (and its pub/sub
//! delivery). The song store only mirrors the flag so it can take part in
//! filter predicates, so lookups here are synchronous and cheap.

use std::collections::HashSet;

pub trait FavouritesStore: Send + Sync {
    /// Whether a single song is marked favourite
    fn get_favourite(&self, song_id: i64) -> bool;

    /// Every favourite song id
    fn get_favourites(&self) -> HashSet<i64>;
}
