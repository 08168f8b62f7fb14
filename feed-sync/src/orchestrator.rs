use crate::dedup::{existing_links, select_new};
use crate::fetcher::validate_url;
use crate::parser::FeedParser;
use crate::types::{Result, SyncConfig, SyncError, SyncOutcome, SyncReport};
use crate::wechat::{extract_external_id, WeChatAdapter};
use chrono::Utc;
use interfaces::{
    ErrorLedger, ErrorRecord, FeedItem, NewSource, Source, SourceId, SourceKind, SourceRegistry,
};
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs sync passes over every known source and registers new ones.
#[derive(Clone)]
pub struct SyncOrchestrator {
    registry: Arc<dyn SourceRegistry>,
    ledger: Arc<dyn ErrorLedger>,
    parser: Arc<FeedParser>,
    wechat: Arc<WeChatAdapter>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        registry: Arc<dyn SourceRegistry>,
        ledger: Arc<dyn ErrorLedger>,
        parser: FeedParser,
        wechat: WeChatAdapter,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            parser: Arc::new(parser),
            wechat: Arc::new(wechat),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn sync_all(&self) -> SyncReport {
        self.run_pass(None).await
    }

    /// Like [`Self::sync_all`]. Once `shutdown` turns true, sources still
    /// waiting for a worker are skipped; running ones finish.
    pub async fn sync_all_with_shutdown(&self, shutdown: watch::Receiver<bool>) -> SyncReport {
        self.run_pass(Some(shutdown)).await
    }

    async fn run_pass(&self, shutdown: Option<watch::Receiver<bool>>) -> SyncReport {
        let started_at = Utc::now();

        let sources = match self.registry.list_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                error!("Failed to list sources, nothing to sync: {}", e);
                return SyncReport::empty(started_at);
            }
        };

        info!("Syncing {} sources", sources.len());

        let permits = self.config.concurrency.clamp(1, Semaphore::MAX_PERMITS);
        let workers = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for source in sources {
            let this = self.clone();
            let workers = workers.clone();
            let mut shutdown = shutdown.clone();

            tasks.spawn(async move {
                let Some(_permit) = acquire_worker(workers, shutdown.as_mut()).await else {
                    debug!("Skipping source {} on shutdown", source.id);
                    return SyncOutcome::Skipped { source_id: source.id };
                };
                this.sync_source(&source).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Sync task did not complete: {}", e),
            }
        }

        let report = SyncReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        info!(
            "Sync pass finished: {} new items, {} failed, {} skipped",
            report.inserted_total(),
            report.failed().len(),
            report.skipped()
        );
        report
    }

    /// Syncs one source. Failures end up in the error ledger, never in the
    /// caller.
    pub async fn sync_source(&self, source: &Source) -> SyncOutcome {
        match self.try_sync_source(source).await {
            Ok(inserted) => SyncOutcome::Synced {
                source_id: source.id,
                inserted,
            },
            Err(e) => {
                warn!(
                    source_id = %source.id,
                    url = %source.url,
                    kind = e.kind(),
                    "Source sync failed: {}",
                    e
                );
                let record = ErrorRecord::new(source.id, &source.url, e.to_string());
                self.record_failure(&record).await;
                SyncOutcome::Failed {
                    source_id: source.id,
                    record,
                }
            }
        }
    }

    async fn try_sync_source(&self, source: &Source) -> Result<usize> {
        let fetched = match source.kind {
            SourceKind::GenericFeed => {
                let budget = self.config.fetch_timeout;
                let feed = tokio::time::timeout(budget, self.parser.parse(&source.url))
                    .await
                    .map_err(|_| SyncError::Timeout(budget))??;
                feed.items
            }
            SourceKind::WechatAccount => {
                let external_id = extract_external_id(&source.url).ok_or_else(|| {
                    SyncError::InvalidInput(format!("no relay account id in {}", source.url))
                })?;
                self.wechat
                    .list_items(&external_id, self.config.relay_list_limit)
                    .await?
            }
        };

        self.store_new_items(source.id, &fetched).await
    }

    /// Dedups against what the store holds right now and inserts the rest
    /// as one batch. Returns how many items the store actually took, which
    /// is lower when an overlapping pass stored some of them first.
    async fn store_new_items(&self, source_id: SourceId, fetched: &[FeedItem]) -> Result<usize> {
        let recent = self.registry.recent_items(source_id, self.config.lookback).await?;
        let existing = existing_links(&recent);
        let new_items = select_new(&existing, fetched, self.config.fetch_limit);

        if new_items.is_empty() {
            debug!("No new items for source {}", source_id);
            return Ok(0);
        }

        for item in &new_items {
            debug!("Saving {} {}", item.link, item.title);
        }
        let inserted = self.registry.insert_items(source_id, &new_items).await?;

        info!(
            "Source {}: fetched {} items, stored {} new",
            source_id,
            fetched.len(),
            inserted
        );
        Ok(inserted)
    }

    async fn record_failure(&self, record: &ErrorRecord) {
        let value = match serde_json::to_string(record) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize error record for {}: {}", record.source_id, e);
                return;
            }
        };

        if let Err(e) = self
            .ledger
            .put(&record.key(), &value, self.config.error_ttl_seconds)
            .await
        {
            error!("Failed to write error record for {}: {}", record.source_id, e);
        }
    }

    /// Current unexpired error record of a source, if any.
    pub async fn last_error(&self, source_id: SourceId) -> Result<Option<ErrorRecord>> {
        let Some(value) = self.ledger.get(&ErrorRecord::key_for(source_id)).await? else {
            return Ok(None);
        };
        let mut record: ErrorRecord = serde_json::from_str(&value)
            .map_err(|e| SyncError::Store(anyhow::anyhow!("unreadable error record: {}", e)))?;
        record.source_id = source_id;
        Ok(Some(record))
    }

    /// Registers a feed URL, or returns the source already registered for
    /// it. The source kind is decided here, once.
    pub async fn add_feed(
        &self,
        url: &str,
        group: Option<String>,
        name: Option<String>,
    ) -> Result<Source> {
        validate_url(url)?;

        if let Some(existing) = self.registry.find_source_by_url(url).await? {
            info!("Source {} already registered as {}", url, existing.id);
            return Ok(existing);
        }

        let mut source = NewSource::new(url, self.wechat.classify(url));
        source.group = group;
        source.name = name;
        let created = self.registry.create_source(source).await?;
        info!("Registered {} source {} ({})", created.kind.as_str(), created.url, created.id);
        Ok(created)
    }

    /// Registers each URL with [`Self::add_feed`], stopping at the first
    /// failure.
    pub async fn add_feeds(&self, urls: &[String]) -> Result<Vec<Source>> {
        let mut sources = Vec::with_capacity(urls.len());
        for url in urls {
            sources.push(self.add_feed(url, None, None).await?);
        }
        Ok(sources)
    }

    /// Interactive registration of a WeChat public account from its
    /// profile link. Relay failures are returned to the caller.
    pub async fn add_wechat_account(
        &self,
        profile_url: &str,
        group: Option<String>,
    ) -> Result<Source> {
        validate_url(profile_url)?;

        let account = self
            .wechat
            .resolve_account(profile_url)
            .await?
            .ok_or_else(|| {
                SyncError::Relay(format!("no public account found for {}", profile_url))
            })?;

        let feed_url = self.wechat.feed_url(&account.external_id);
        if let Some(existing) = self.registry.find_source_by_url(&feed_url).await? {
            info!("WeChat account {} already registered as {}", account.name, existing.id);
            return Ok(existing);
        }

        let feed_url = self.wechat.start_tracking(&account).await;

        let source = self
            .registry
            .create_source(NewSource {
                url: feed_url,
                kind: SourceKind::WechatAccount,
                group,
                name: Some(account.name.clone()),
                description: Some(account.description.clone()),
                icon: Some(account.cover_image.clone()),
            })
            .await?;

        let items = self
            .wechat
            .list_items(&account.external_id, self.config.relay_list_limit)
            .await?;
        let inserted = if items.is_empty() {
            0
        } else {
            self.registry.insert_items(source.id, &items).await?
        };

        info!(
            "Registered WeChat account {} as {} with {} items",
            account.name, source.id, inserted
        );
        Ok(source)
    }
}

/// Waits for a free worker. `None` means shutdown came first.
async fn acquire_worker(
    workers: Arc<Semaphore>,
    shutdown: Option<&mut watch::Receiver<bool>>,
) -> Option<OwnedSemaphorePermit> {
    let Some(shutdown) = shutdown else {
        return workers.acquire_owned().await.ok();
    };

    if *shutdown.borrow_and_update() {
        return None;
    }

    let permit = tokio::select! {
        permit = workers.acquire_owned() => permit.ok(),
        _ = wait_for_shutdown(shutdown) => None,
    }?;

    if *shutdown.borrow() {
        return None;
    }
    Some(permit)
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() {
            // Sender gone: shutdown can no longer be requested.
            std::future::pending::<()>().await;
        }
        if *shutdown.borrow_and_update() {
            return;
        }
    }
}
