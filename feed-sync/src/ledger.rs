use anyhow::Result;
use async_trait::async_trait;
use interfaces::ErrorLedger;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Ledger backed by Redis keys with `EX` expiry.
#[derive(Clone)]
pub struct RedisErrorLedger {
    client: redis::Client,
}

impl RedisErrorLedger {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ErrorLedger for RedisErrorLedger {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        con.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }
}

/// In-process ledger. Expired entries are invisible and dropped lazily.
/// A TTL too large to represent never expires.
#[derive(Default)]
pub struct MemoryErrorLedger {
    entries: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

fn is_live(expires_at: &Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |expires_at| expires_at > now)
}

impl MemoryErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys that have not expired yet, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, (_, expires_at))| is_live(expires_at, now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ErrorLedger for MemoryErrorLedger {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let now = Instant::now();
        let expires_at = now.checked_add(Duration::from_secs(ttl_seconds));
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expiry)| is_live(expiry, now));
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| is_live(expires_at, Instant::now()))
            .map(|(value, _)| value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_overwrites() {
        let ledger = MemoryErrorLedger::new();
        ledger.put("rssSyncError:a", "first", 60).await.unwrap();
        ledger.put("rssSyncError:a", "second", 60).await.unwrap();

        assert_eq!(ledger.get("rssSyncError:a").await.unwrap().as_deref(), Some("second"));
        assert_eq!(ledger.keys().await, vec!["rssSyncError:a".to_string()]);
        assert_eq!(ledger.get("rssSyncError:b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow() {
        let ledger = MemoryErrorLedger::new();
        ledger.put("rssSyncError:a", "kept", u64::MAX).await.unwrap();

        assert_eq!(ledger.get("rssSyncError:a").await.unwrap().as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn zero_ttl_entries_are_already_expired() {
        let ledger = MemoryErrorLedger::new();
        ledger.put("rssSyncError:a", "gone", 0).await.unwrap();

        assert_eq!(ledger.get("rssSyncError:a").await.unwrap(), None);
        assert!(ledger.keys().await.is_empty());
    }
}
