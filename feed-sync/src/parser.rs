use crate::date;
use crate::fetcher::{validate_url, Fetcher};
use crate::types::{CanonicalFeed, Result, SyncError};
use chrono::{DateTime, Utc};
use interfaces::FeedItem;
use roxmltree::{Document, Node, ParsingOptions};
use tracing::{debug, info, warn};

/// Turns a feed URL into a [`CanonicalFeed`], whatever the XML dialect.
#[derive(Clone)]
pub struct FeedParser {
    fetcher: Fetcher,
}

impl FeedParser {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    pub async fn parse(&self, url: &str) -> Result<CanonicalFeed> {
        validate_url(url)?;
        let fetched_at = Utc::now();
        let content = self.fetcher.fetch_text(url).await?;
        parse_document(&content, fetched_at)
    }
}

/// Parses an RSS 2.0 or Atom document. Items without any timestamp get
/// `fetched_at`.
pub fn parse_document(content: &str, fetched_at: DateTime<Utc>) -> Result<CanonicalFeed> {
    debug!("Parsing feed content ({} bytes)", content.len());

    let content = content.trim_start_matches('\u{feff}').trim_start();
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = Document::parse_with_options(content, options)
        .map_err(|e| SyncError::Parse(format!("malformed XML: {}", e)))?;

    let channel = find_channel(&document)?;

    let item_tag = if has_child(channel, "item") { "item" } else { "entry" };
    let mut items = Vec::new();
    for node in children_named(channel, item_tag) {
        match parse_item(node, fetched_at) {
            Some(item) => items.push(item),
            None => debug!("Skipping {} without a link", item_tag),
        }
    }

    let feed = CanonicalFeed {
        id: child_text(channel, "id"),
        title: child_text(channel, "title").unwrap_or_default(),
        link: resolve_link(channel),
        items,
    };

    info!("Parsed feed {:?} with {} items", feed.title, feed.items.len());
    Ok(feed)
}

/// RSS keeps its items under `rss/channel`, Atom under the `feed` root.
/// A repeated `channel` is tolerated; the first one wins.
fn find_channel<'a, 'input>(document: &'a Document<'input>) -> Result<Node<'a, 'input>> {
    let root = document.root_element();
    match root.tag_name().name() {
        "rss" => children_named(root, "channel")
            .next()
            .ok_or_else(|| SyncError::Parse("rss document has no channel".to_string())),
        "feed" => Ok(root),
        other => Err(SyncError::Parse(format!(
            "unsupported root element <{}>, expected <rss> or <feed>",
            other
        ))),
    }
}

fn parse_item(node: Node, fetched_at: DateTime<Utc>) -> Option<FeedItem> {
    let link = resolve_link(node)?;
    let title = child_text(node, "title").unwrap_or_default();
    let external_id = child_text(node, "guid").or_else(|| child_text(node, "id"));

    let created_at = ["updated", "pubDate", "created"]
        .iter()
        .find_map(|tag| child_text(node, tag))
        .map(|raw| {
            date::try_normalize(&raw).unwrap_or_else(|| {
                warn!("Unrecognised date {:?} for {}, using fetch time", raw, link);
                fetched_at
            })
        })
        .unwrap_or(fetched_at);

    Some(FeedItem {
        external_id,
        title,
        link,
        created_at,
    })
}

/// Atom links carry the target in `href`; RSS links are text. Among
/// several Atom links the `alternate` one is preferred.
fn resolve_link(node: Node) -> Option<String> {
    let links: Vec<Node> = children_named(node, "link").collect();

    let href = links
        .iter()
        .filter(|link| matches!(link.attribute("rel"), None | Some("alternate")))
        .chain(links.iter())
        .find_map(|link| link.attribute("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());

    href.or_else(|| links.iter().find_map(|link| text_of(*link)))
}

/// Children that share the parent's namespace, so `atom:link` inside an
/// RSS item is not mistaken for the item's own `link`.
fn children_named<'a, 'input: 'a>(
    parent: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    let namespace = parent.tag_name().namespace();
    parent.children().filter(move |child| {
        child.is_element()
            && child.tag_name().name() == name
            && child.tag_name().namespace() == namespace
    })
}

fn has_child(parent: Node, name: &str) -> bool {
    children_named(parent, name).next().is_some()
}

fn child_text(parent: Node, name: &str) -> Option<String> {
    children_named(parent, name).find_map(text_of)
}

fn text_of(node: Node) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|descendant| descendant.is_text())
        .filter_map(|descendant| descendant.text())
        .collect();
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
