//! Client for the relay service that exposes WeChat public accounts.
//!
//! Accounts are not feed-addressable on their own: an account is resolved
//! from its profile link, registered with the relay, and from then on its
//! articles can be listed by the relay-assigned id.

use crate::types::{Result, SyncError};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{TimeZone, Utc};
use interfaces::{FeedItem, SourceKind};
use regex::Regex;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CACHE_CONTROL,
    COOKIE, ORIGIN, REFERER,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ARTICLE_URL_PREFIX: &str = "https://mp.weixin.qq.com/s/";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: String,
    /// Public base under which the relay serves `/feeds/<id>.atom`.
    pub atom_url: String,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
    pub user_agent: String,
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            atom_url: "http://localhost:4000".to_string(),
            authorization: None,
            cookie: None,
            user_agent: concat!(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
                "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
            )
            .to_string(),
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Account as reported by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(rename = "id")]
    pub external_id: String,
    pub name: String,
    #[serde(rename = "cover", default)]
    pub cover_image: String,
    #[serde(rename = "intro", default)]
    pub description: String,
    #[serde(rename = "updateTime", default)]
    pub update_time: i64,
}

// The relay speaks batched tRPC: every response is an array of envelopes.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<EnvelopeResult<T>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResult<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ArticlePage {
    #[serde(default)]
    items: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    id: String,
    #[serde(default)]
    title: String,
    publish_time: i64,
}

fn feed_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/feeds/([^./?#]+)\.atom$").expect("feed url pattern compiles")
    })
}

/// Relay account id of a relay feed URL, which must end in
/// `/feeds/<id>.atom`.
pub fn extract_external_id(feed_url: &str) -> Option<String> {
    feed_url_pattern()
        .captures(feed_url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

pub struct WeChatAdapter {
    client: Client,
    config: RelayConfig,
}

impl WeChatAdapter {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let headers = default_headers(&config)?;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create relay client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn feed_url(&self, external_id: &str) -> String {
        format!("{}/feeds/{}.atom", self.config.atom_url.trim_end_matches('/'), external_id)
    }

    /// One-time classification of a new source. Only feed URLs served
    /// under this relay's atom base are WeChat accounts.
    pub fn classify(&self, url: &str) -> SourceKind {
        let relay_feeds = format!("{}/feeds/", self.config.atom_url.trim_end_matches('/'));
        if url.starts_with(&relay_feeds) && extract_external_id(url).is_some() {
            SourceKind::WechatAccount
        } else {
            SourceKind::GenericFeed
        }
    }

    /// Looks an account up by its public profile link. `None` when the
    /// relay knows no such account.
    pub async fn resolve_account(&self, profile_url: &str) -> Result<Option<AccountInfo>> {
        let op = "platform.getMpInfo";
        let body = json!({ "0": { "wxsLink": profile_url } });
        let response = self
            .send(op, || {
                self.client
                    .post(self.endpoint(op))
                    .query(&[("batch", "1")])
                    .json(&body)
            })
            .await?;

        let accounts: Option<Option<Vec<AccountInfo>>> = read_envelope(op, response).await?;
        let account = accounts.flatten().and_then(|accounts| accounts.into_iter().next());

        match &account {
            Some(account) => {
                info!("Resolved WeChat account {} ({})", account.name, account.external_id)
            }
            None => info!("Relay knows no account for {}", profile_url),
        }
        Ok(account)
    }

    /// Asks the relay to start tracking an account.
    pub async fn register_feed(&self, account: &AccountInfo) -> Result<()> {
        let op = "feed.add";
        let body = json!({
            "0": {
                "id": account.external_id,
                "mpName": account.name,
                "mpCover": account.cover_image,
                "mpIntro": account.description,
                "updateTime": account.update_time,
                "status": 1,
            }
        });
        let response = self
            .send(op, || {
                self.client
                    .post(self.endpoint(op))
                    .query(&[("batch", "1")])
                    .json(&body)
            })
            .await?;
        let _: Option<serde_json::Value> = read_envelope(op, response).await?;
        debug!("Registered WeChat account {}", account.external_id);
        Ok(())
    }

    /// Forces the relay to pull the account's articles now.
    pub async fn refresh_articles(&self, external_id: &str) -> Result<()> {
        let op = "feed.refreshArticles";
        let body = json!({ "0": { "mpId": external_id } });
        let response = self
            .send(op, || {
                self.client
                    .post(self.endpoint(op))
                    .query(&[("batch", "1")])
                    .json(&body)
            })
            .await?;
        let _: Option<serde_json::Value> = read_envelope(op, response).await?;
        debug!("Requested article refresh for {}", external_id);
        Ok(())
    }

    /// Registration followed by a refresh. Neither failure is fatal: the
    /// relay may already track the account. Returns the account's feed URL.
    pub async fn start_tracking(&self, account: &AccountInfo) -> String {
        if let Err(e) = self.register_feed(account).await {
            warn!("Registering {} with the relay failed: {}", account.external_id, e);
        }
        if let Err(e) = self.refresh_articles(&account.external_id).await {
            warn!("Refreshing {} on the relay failed: {}", account.external_id, e);
        }
        self.feed_url(&account.external_id)
    }

    /// Up to `limit` articles of an account, newest first.
    pub async fn list_items(&self, external_id: &str, limit: usize) -> Result<Vec<FeedItem>> {
        let op = "article.list";
        let input = json!({ "0": { "limit": limit, "mpId": external_id } }).to_string();
        let response = self
            .send(op, || {
                self.client
                    .get(self.endpoint(op))
                    .query(&[("batch", "1"), ("input", input.as_str())])
            })
            .await?;

        let page: Option<ArticlePage> = read_envelope(op, response).await?;
        let articles = page.map(|page| page.items).unwrap_or_default();

        let mut items: Vec<FeedItem> = articles.into_iter().map(article_to_item).collect();
        // Relay order is not trusted.
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        info!("Listed {} articles for WeChat account {}", items.len(), external_id);
        Ok(items)
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/trpc/{}", self.config.base_url.trim_end_matches('/'), op)
    }

    /// Sends with retries on transport errors and 5xx answers.
    async fn send<F>(&self, op: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff = ExponentialBackoff {
            current_interval: self.config.retry_delay,
            initial_interval: self.config.retry_delay,
            max_interval: self.config.retry_delay * 32,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            let failure = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_server_error() => {
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    let status = response.status();
                    return Err(SyncError::Relay(format!("{} rejected with HTTP {}", op, status)));
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.config.max_retries {
                return Err(SyncError::Relay(format!(
                    "{} failed after {} attempts: {}",
                    op,
                    attempt + 1,
                    failure
                )));
            }
            attempt += 1;

            let delay = backoff.next_backoff().unwrap_or(self.config.retry_delay);
            warn!("Relay call {} failed ({}), retrying in {:?}", op, failure, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

fn default_headers(config: &RelayConfig) -> Result<HeaderMap> {
    let base = config.base_url.trim_end_matches('/');
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, ACCEPT, "*/*")?;
    insert_header(&mut headers, ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9")?;
    insert_header(&mut headers, CACHE_CONTROL, "no-cache")?;
    insert_header(&mut headers, ORIGIN, base)?;
    insert_header(&mut headers, REFERER, &format!("{}/dash/feeds", base))?;
    if let Some(authorization) = &config.authorization {
        insert_header(&mut headers, AUTHORIZATION, authorization)?;
    }
    if let Some(cookie) = &config.cookie {
        insert_header(&mut headers, COOKIE, cookie)?;
    }
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| SyncError::Config(format!("invalid {} header: {}", name, e)))?;
    headers.insert(name, value);
    Ok(())
}

async fn read_envelope<T: DeserializeOwned>(op: &str, response: Response) -> Result<Option<T>> {
    let envelopes: Vec<Envelope<T>> = response
        .json()
        .await
        .map_err(|e| SyncError::Relay(format!("{} returned an unexpected body: {}", op, e)))?;

    match envelopes.into_iter().next() {
        Some(Envelope { error: Some(error), .. }) => {
            Err(SyncError::Relay(format!("{} reported an error: {}", op, error)))
        }
        Some(Envelope { result: Some(result), .. }) => Ok(Some(result.data)),
        _ => Ok(None),
    }
}

fn article_to_item(article: Article) -> FeedItem {
    let created_at = Utc
        .timestamp_opt(article.publish_time, 0)
        .single()
        .unwrap_or_else(Utc::now);

    FeedItem {
        link: format!("{}{}", ARTICLE_URL_PREFIX, article.id),
        external_id: Some(article.id),
        title: article.title,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_url_round_trips_through_the_pattern() {
        let adapter = WeChatAdapter::new(RelayConfig {
            atom_url: "https://relay.example.com/".to_string(),
            ..RelayConfig::default()
        })
        .unwrap();

        let url = adapter.feed_url("MP_WXS_3941633310");
        assert_eq!(url, "https://relay.example.com/feeds/MP_WXS_3941633310.atom");
        assert_eq!(extract_external_id(&url).as_deref(), Some("MP_WXS_3941633310"));
    }

    #[test]
    fn classifies_by_url_pattern() {
        let adapter = WeChatAdapter::new(RelayConfig {
            atom_url: "https://relay.example.com".to_string(),
            ..RelayConfig::default()
        })
        .unwrap();

        let wechat = |url: &str| adapter.classify(url) == SourceKind::WechatAccount;

        assert!(wechat("https://relay.example.com/feeds/MP_WXS_1.atom"));
        assert!(!wechat("https://blog.example.com/atom.xml"));
        assert!(!wechat("https://blog.example.com/feeds/all.rss"));
        // Pelican's default Atom path.
        assert!(!wechat("https://relay.example.com/feeds/all.atom.xml"));
        assert!(!wechat("https://blog.example.com/feeds/MP_WXS_1.atom"));
        assert!(!wechat("https://relay.example.com/feeds/MP_WXS_1.atom?page=2"));
    }

    #[test]
    fn external_id_needs_the_full_feed_suffix() {
        assert_eq!(
            extract_external_id("https://relay.example.com/feeds/MP_WXS_1.atom").as_deref(),
            Some("MP_WXS_1")
        );
        assert_eq!(extract_external_id("https://blog.example.com/feeds/all.atom.xml"), None);
        assert_eq!(extract_external_id("https://relay.example.com/dash/feeds"), None);
    }

    #[test]
    fn article_links_use_the_public_template() {
        let item = article_to_item(Article {
            id: "abc123".to_string(),
            title: "Hello".to_string(),
            publish_time: 1_718_688_256,
        });
        assert_eq!(item.link, "https://mp.weixin.qq.com/s/abc123");
        assert_eq!(item.external_id.as_deref(), Some("abc123"));
        assert_eq!(item.created_at.timestamp(), 1_718_688_256);
    }

    #[test]
    fn rejects_unencodable_headers() {
        let result = WeChatAdapter::new(RelayConfig {
            authorization: Some("bad\nvalue".to_string()),
            ..RelayConfig::default()
        });
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
