//! Decides which fetched items are new for a source.
//!
//! `existing` is passed in on every call and never cached, so overlapping
//! passes always compare against what the store holds right now.

use interfaces::FeedItem;
use std::collections::HashSet;

/// Links of already stored items, the dedup key set.
pub fn existing_links(stored: &[FeedItem]) -> HashSet<String> {
    stored.iter().map(|item| item.link.clone()).collect()
}

/// Keeps the first `limit` fetched items whose link is not in `existing`,
/// in fetched order. Duplicates inside `fetched` are each tested on their
/// own.
pub fn select_new(existing: &HashSet<String>, fetched: &[FeedItem], limit: usize) -> Vec<FeedItem> {
    fetched
        .iter()
        .take(limit)
        .filter(|item| !existing.contains(&item.link))
        .cloned()
        .collect()
}
