use feed_sync::{FeedParser, Fetcher, SyncConfig, SyncError};
use std::sync::Once;
use tracing::info;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

fn parser() -> FeedParser {
    FeedParser::new(Fetcher::new(&SyncConfig::default()).unwrap())
}

const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://example.com</link>
    <item>
      <title>First</title>
      <link>https://example.com/a</link>
      <guid>a-1</guid>
      <pubDate>Tue, 10 Jun 2025 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/b</link>
      <pubDate>Mon, 09 Jun 2025 08:00:00 +0200</pubDate>
    </item>
  </channel>
</rss>"#;

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <id>urn:example</id>
  <link href="https://example.org/"/>
  <entry>
    <title>Atom entry</title>
    <id>urn:example:1</id>
    <link rel="alternate" href="https://example.org/1"/>
    <updated>2025-06-10T08:00:00Z</updated>
  </entry>
</feed>"#;

#[tokio::test]
async fn parses_rss_over_http() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
        .expect(1)
        .mount(&server)
        .await;

    let feed = parser().parse(&format!("{}/rss.xml", server.uri())).await.unwrap();
    info!("Parsed {} items", feed.items.len());

    assert_eq!(feed.title, "Example News");
    assert_eq!(feed.items.len(), 2);
    assert_eq!(feed.items[0].link, "https://example.com/a");
    assert_eq!(feed.items[0].external_id.as_deref(), Some("a-1"));
    assert_eq!(feed.items[1].created_at.to_rfc3339(), "2025-06-09T06:00:00+00:00");
}

#[tokio::test]
async fn parses_atom_over_http() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/atom.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM))
        .mount(&server)
        .await;

    let feed = parser().parse(&format!("{}/atom.xml", server.uri())).await.unwrap();

    assert_eq!(feed.id.as_deref(), Some("urn:example"));
    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].link, "https://example.org/1");
    assert_eq!(feed.items[0].external_id.as_deref(), Some("urn:example:1"));
}

#[tokio::test]
async fn invalid_url_is_rejected_before_any_request() {
    init_tracing();
    let server = MockServer::start().await;

    for url in ["", "not a url", "ftp://example.com/feed.xml"] {
        let err = parser().parse(url).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input", "{url:?}");
    }

    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn http_errors_are_fetch_failures() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = parser().parse(&format!("{}/missing.xml", server.uri())).await.unwrap_err();
    assert!(matches!(err, SyncError::Fetch(_)), "{err}");
}

#[tokio::test]
async fn html_pages_are_parse_failures() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>hello</body></html>"))
        .mount(&server)
        .await;

    let err = parser().parse(&format!("{}/page", server.uri())).await.unwrap_err();
    assert_eq!(err.kind(), "parse");
}
