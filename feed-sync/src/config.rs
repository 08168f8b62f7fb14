use crate::types::SyncConfig;
use crate::wechat::RelayConfig;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Upper bound for how long an error record is kept.
pub const MAX_ERROR_TTL_SECS: u64 = 365 * 86_400;

/// feed-sync - keep stored feed items in step with their sources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sync every source now and then once per interval, until Ctrl-C
    Run,
    /// Run a single sync pass and print a summary
    Sync,
    /// Register a feed URL
    AddFeed {
        url: String,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Register a WeChat public account from its profile link
    AddWechat {
        profile_url: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Show the last recorded sync error of a source
    Errors { source_id: Uuid },
    /// Create the database schema
    InitDb,
}

#[derive(Args, Debug, Clone)]
pub struct Settings {
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Keep sources, items and errors in memory only
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Feed URL to register before the command runs. Repeatable; this is
    /// how a `--dry-run` pass gets its sources.
    #[arg(long = "feed", value_name = "URL", global = true)]
    pub feeds: Vec<String>,

    #[arg(long, env = "WE_RSS_URL", default_value = "http://localhost:4000", global = true)]
    pub relay_url: String,

    /// Public base of the relay's atom feeds, if it differs from the API
    #[arg(long, env = "WE_RSS_ATOM_URL", global = true)]
    pub relay_atom_url: Option<String>,

    #[arg(long, env = "WE_RSS_AUTHORIZATION", global = true, hide_env_values = true)]
    pub relay_authorization: Option<String>,

    #[arg(long, env = "WE_RSS_COOKIE", global = true, hide_env_values = true)]
    pub relay_cookie: Option<String>,

    #[arg(long, env = "WE_RSS_INSECURE", global = true)]
    pub relay_insecure: bool,

    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = 1800, global = true)]
    pub interval_secs: u64,

    #[arg(long, env = "SYNC_CONCURRENCY", default_value_t = 16, global = true)]
    pub concurrency: usize,

    #[arg(long, env = "SYNC_FETCH_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub fetch_timeout_secs: u64,

    #[arg(long, env = "SYNC_ERROR_TTL_SECS", default_value_t = 86_400, global = true)]
    pub error_ttl_secs: u64,
}

impl Settings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            error_ttl_seconds: self.error_ttl_secs.min(MAX_ERROR_TTL_SECS),
            concurrency: self.concurrency.clamp(1, Semaphore::MAX_PERMITS),
            sync_interval: Duration::from_secs(self.interval_secs.max(1)),
            ..SyncConfig::default()
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        let base_url = self.relay_url.trim_end_matches('/').to_string();
        let atom_url = self
            .relay_atom_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| base_url.clone());

        RelayConfig {
            base_url,
            atom_url,
            authorization: self.relay_authorization.clone(),
            cookie: self.relay_cookie.clone(),
            accept_invalid_certs: self.relay_insecure,
            ..RelayConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_feed_with_group() {
        let cli = Cli::try_parse_from([
            "feed-sync",
            "--dry-run",
            "add-feed",
            "https://example.com/rss.xml",
            "--group",
            "news",
        ])
        .unwrap();

        assert!(cli.settings.dry_run);
        assert_eq!(
            cli.command,
            Command::AddFeed {
                url: "https://example.com/rss.xml".to_string(),
                group: Some("news".to_string()),
                name: None,
            }
        );
    }

    #[test]
    fn relay_atom_url_defaults_to_api_base() {
        let cli = Cli::try_parse_from(["feed-sync", "--relay-url", "https://relay.local/", "sync"])
            .unwrap();
        let relay = cli.settings.relay_config();

        assert_eq!(relay.base_url, "https://relay.local");
        assert_eq!(relay.atom_url, "https://relay.local");
    }

    #[test]
    fn settings_flow_into_sync_config() {
        let cli = Cli::try_parse_from([
            "feed-sync",
            "--concurrency",
            "0",
            "--fetch-timeout-secs",
            "3",
            "run",
        ])
        .unwrap();
        let config = cli.settings.sync_config();

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.lookback, 10);
    }

    #[test]
    fn seed_feeds_are_repeatable() {
        let cli = Cli::try_parse_from([
            "feed-sync",
            "--dry-run",
            "--feed",
            "https://a.example/rss",
            "--feed",
            "https://b.example/atom.xml",
            "sync",
        ])
        .unwrap();

        assert_eq!(cli.command, Command::Sync);
        assert_eq!(
            cli.settings.feeds,
            vec!["https://a.example/rss".to_string(), "https://b.example/atom.xml".to_string()]
        );
    }

    #[test]
    fn oversized_values_are_clamped() {
        let concurrency = (Semaphore::MAX_PERMITS as u64 + 1).to_string();
        let ttl = u64::MAX.to_string();
        let cli = Cli::try_parse_from([
            "feed-sync",
            "--concurrency",
            concurrency.as_str(),
            "--error-ttl-secs",
            ttl.as_str(),
            "sync",
        ])
        .unwrap();
        let config = cli.settings.sync_config();

        assert_eq!(config.concurrency, Semaphore::MAX_PERMITS);
        assert_eq!(config.error_ttl_seconds, MAX_ERROR_TTL_SECS);
    }
}
