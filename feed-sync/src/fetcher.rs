use crate::types::{Result, SyncConfig, SyncError};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// Rejects anything that is not an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<Url> {
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return Err(SyncError::InvalidInput(format!("not a feed URL: {:?}", raw)));
    }

    let parsed = Url::parse(raw)
        .map_err(|e| SyncError::InvalidInput(format!("not a feed URL: {:?} ({})", raw, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SyncError::InvalidInput(format!(
            "unsupported scheme {:?} in {:?}",
            parsed.scheme(),
            raw
        )));
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(SyncError::InvalidInput(format!("missing host in {:?}", raw))),
    }
}

/// Single-shot HTTP GET for feed documents.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let url = validate_url(url)?;

        debug!("Fetching feed: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(SyncError::Fetch)?
            .error_for_status()
            .map_err(SyncError::Fetch)?;

        let content = response.text().await.map_err(SyncError::Fetch)?;
        info!("Fetched feed: {} ({} bytes)", url, content.len());
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("http://example.com/rss?x=1").is_ok());
    }

    #[test]
    fn rejects_everything_else() {
        for raw in [
            "",
            "example.com/feed",
            "ftp://example.com/feed",
            "file:///etc/passwd",
            "https://exa mple.com/feed",
            "mailto:someone@example.com",
            "not a url",
        ] {
            let err = validate_url(raw).unwrap_err();
            assert_eq!(err.kind(), "invalid_input", "{:?} should be rejected", raw);
        }
    }
}
