use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SourceId = Uuid;

/// How a source is synchronised. Decided once when the source is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    GenericFeed,
    WechatAccount,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::GenericFeed => "generic_feed",
            SourceKind::WechatAccount => "wechat_account",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generic_feed" => Some(SourceKind::GenericFeed),
            "wechat_account" => Some(SourceKind::WechatAccount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub url: String,
    pub kind: SourceKind,
    pub group: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSource {
    pub url: String,
    pub kind: SourceKind,
    pub group: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

impl NewSource {
    pub fn new(url: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
            group: None,
            name: None,
            description: None,
            icon: None,
        }
    }
}

/// One normalised entry of a feed. `link` is the natural key inside a
/// source; `title` and `created_at` are best effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub external_id: Option<String>,
    pub title: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

/// Diagnostic entry written when one source fails during a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(skip)]
    pub source_id: SourceId,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

impl ErrorRecord {
    pub const KEY_PREFIX: &'static str = "rssSyncError:";

    pub fn new(source_id: SourceId, url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_id,
            url: url.into(),
            timestamp: Utc::now(),
            error: error.into(),
        }
    }

    pub fn key(&self) -> String {
        Self::key_for(self.source_id)
    }

    pub fn key_for(source_id: SourceId) -> String {
        format!("{}{}", Self::KEY_PREFIX, source_id)
    }
}

// Object style note:
// Sources are referenced by id everywhere in the engine and are never
// embedded inside items. FeedItem carries no source reference of its own;
// the registry scopes every item read and write by source id.
