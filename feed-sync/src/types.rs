use chrono::{DateTime, Utc};
use interfaces::{ErrorRecord, FeedItem, SourceId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Feed as seen after parsing, independent of the RSS or Atom dialect.
/// Only its items outlive a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalFeed {
    pub id: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub user_agent: String,
    pub max_redirects: usize,
    /// Hard budget for one generic feed fetch and parse.
    pub fetch_timeout: Duration,
    /// How many stored items are consulted when deciding what is new.
    pub lookback: usize,
    /// How many fetched items are considered per source and pass.
    pub fetch_limit: usize,
    /// How many articles are requested from the relay per account.
    pub relay_list_limit: usize,
    pub error_ttl_seconds: u64,
    pub concurrency: usize,
    pub sync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_agent: "feed-sync/0.1".to_string(),
            max_redirects: 5,
            fetch_timeout: Duration::from_secs(10),
            lookback: 10,
            fetch_limit: 10,
            relay_list_limit: 100,
            error_ttl_seconds: 86_400,
            concurrency: 16,
            sync_interval: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { source_id: SourceId, inserted: usize },
    Failed { source_id: SourceId, record: ErrorRecord },
    /// Never started because the pass was shut down first.
    Skipped { source_id: SourceId },
}

impl SyncOutcome {
    pub fn source_id(&self) -> SourceId {
        match self {
            SyncOutcome::Synced { source_id, .. }
            | SyncOutcome::Failed { source_id, .. }
            | SyncOutcome::Skipped { source_id } => *source_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    pub fn inserted_total(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                SyncOutcome::Synced { inserted, .. } => *inserted,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> Vec<&ErrorRecord> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                SyncOutcome::Failed { record, .. } => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, SyncOutcome::Skipped { .. }))
            .count()
    }

    pub fn outcome_for(&self, source_id: SourceId) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|outcome| outcome.source_id() == source_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Fetch error: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidInput(_) => "invalid_input",
            SyncError::Fetch(_) => "fetch",
            SyncError::Parse(_) => "parse",
            SyncError::Relay(_) => "relay",
            SyncError::Timeout(_) => "timeout",
            SyncError::Store(_) => "store",
            SyncError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
