use anyhow::{bail, Result};
use async_trait::async_trait;
use interfaces::{FeedItem, NewSource, Source, SourceId, SourceRegistry};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    sources: Vec<Source>,
    items: HashMap<SourceId, Vec<FeedItem>>,
}

/// Registry held in process memory, with the same contract as the
/// Postgres one: unique source URLs, and `(source, link)` pairs stored at
/// most once.
#[derive(Default)]
pub struct MemorySourceRegistry {
    inner: RwLock<Inner>,
}

impl MemorySourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored item of a source, in insertion order.
    pub async fn items(&self, source_id: SourceId) -> Vec<FeedItem> {
        let inner = self.inner.read().await;
        inner.items.get(&source_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SourceRegistry for MemorySourceRegistry {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self.inner.read().await.sources.clone())
    }

    async fn find_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let inner = self.inner.read().await;
        Ok(inner.sources.iter().find(|source| source.url == url).cloned())
    }

    async fn create_source(&self, source: NewSource) -> Result<Source> {
        let mut inner = self.inner.write().await;
        if inner.sources.iter().any(|existing| existing.url == source.url) {
            bail!("source {} already exists", source.url);
        }

        let created = Source {
            id: Uuid::new_v4(),
            url: source.url,
            kind: source.kind,
            group: source.group,
            name: source.name,
            description: source.description,
            icon: source.icon,
        };
        inner.sources.push(created.clone());
        Ok(created)
    }

    async fn recent_items(&self, source_id: SourceId, limit: usize) -> Result<Vec<FeedItem>> {
        let inner = self.inner.read().await;
        let mut items = inner.items.get(&source_id).cloned().unwrap_or_default();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn insert_items(&self, source_id: SourceId, items: &[FeedItem]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        if !inner.sources.iter().any(|source| source.id == source_id) {
            bail!("unknown source {}", source_id);
        }

        let stored = inner.items.entry(source_id).or_default();
        let mut inserted = 0;
        for item in items {
            if !stored.iter().any(|existing| existing.link == item.link) {
                stored.push(item.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
