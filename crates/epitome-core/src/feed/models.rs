use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Opaque chat channel identifier
pub type DestinationId = String;

/// A subscribed feed URL with its cursor and destinations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub destinations: BTreeSet<DestinationId>,
    /// Items published at or before this instant are considered delivered
    pub cursor: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub fetch_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// Check if the last fetch failed
    pub fn has_error(&self) -> bool {
        self.fetch_error.is_some()
    }
}

/// Data required to create a new source
#[derive(Debug, Clone)]
pub struct NewSource {
    pub url: String,
    pub name: String,
    pub cursor: DateTime<Utc>,
}

/// A delivery target with its keyword filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub filters: BTreeSet<String>,
}

/// One normalized entry of a fetched feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
}

/// Result of fetching one feed
#[derive(Debug, Clone, Default)]
pub struct FetchedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// A deduplicated, ready-to-render item produced by one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub source_id: Uuid,
    /// Name of the source that first produced the item
    pub name: String,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
    /// Names of other sources that carried the same item in this run
    #[serde(default)]
    pub duplicate_source_names: Vec<String>,
}

impl Publication {
    pub fn from_item(source: &Source, item: FeedItem) -> Self {
        Self {
            source_id: source.id,
            name: source.name.clone(),
            title: item.title,
            link: item.link,
            summary: item.summary,
            author: item.author,
            published_at: item.published_at,
            image_url: item.image_url,
            duplicate_source_names: Vec::new(),
        }
    }

    /// Same item if title, link or summary match exactly
    pub fn is_same_as(&self, item: &FeedItem) -> bool {
        self.title == item.title || self.link == item.link || self.summary == item.summary
    }
}
