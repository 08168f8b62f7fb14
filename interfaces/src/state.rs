use anyhow::Result;
use async_trait::async_trait;

use crate::defs::FeedItem;
use crate::defs::NewSource;
use crate::defs::Source;
use crate::defs::SourceId;

/// Persistence of sources and their stored items.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn find_source_by_url(&self, url: &str) -> Result<Option<Source>>;

    async fn create_source(&self, source: NewSource) -> Result<Source>;

    /// Most recent stored items of a source, newest `created_at` first.
    async fn recent_items(&self, source_id: SourceId, limit: usize) -> Result<Vec<FeedItem>>;

    /// Batch insert. Either the whole batch is applied or none of it is.
    /// Links the source already holds are skipped; returns how many items
    /// were actually stored.
    async fn insert_items(&self, source_id: SourceId, items: &[FeedItem]) -> Result<usize>;
}

/// Expiring key/value sink for per-source sync failures.
#[async_trait]
pub trait ErrorLedger: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
}
