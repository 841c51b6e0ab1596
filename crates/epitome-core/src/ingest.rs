//! Per-run duplicate detection and cursor computation
//!
//! The engine is pure: it never touches the network or the database. The
//! pipeline feeds it each source's fetched items in source order and persists
//! the resulting cursor updates once delivery is done.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::feed::{FeedItem, Publication, Source};

/// New cursor position computed for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorUpdate {
    pub source_id: Uuid,
    pub cursor: DateTime<Utc>,
}

/// Counters for one source's contribution to a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceIngest {
    pub fresh: usize,
    pub duplicates: usize,
}

/// Everything a run produced before routing
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Ascending by `published_at`
    pub publications: Vec<Publication>,
    pub cursor_updates: Vec<CursorUpdate>,
}

/// Accumulates publications across the sources of a single run
#[derive(Debug, Default)]
pub struct DedupBuffer {
    publications: Vec<Publication>,
    cursor_updates: Vec<CursorUpdate>,
}

impl DedupBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one source's items into the run.
    ///
    /// Only items strictly newer than the source's cursor are considered. The
    /// source's cursor moves to its latest such item even when every one of
    /// them turned out to be a duplicate of another source's publication.
    pub fn ingest(&mut self, source: &Source, items: Vec<FeedItem>) -> SourceIngest {
        let mut fresh: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| item.published_at > source.cursor)
            .collect();
        fresh.sort_by_key(|item| item.published_at);

        let mut stats = SourceIngest::default();
        let Some(latest) = fresh.last().map(|item| item.published_at) else {
            return stats;
        };

        for item in fresh {
            match self.publications.iter_mut().find(|p| p.is_same_as(&item)) {
                Some(existing) => {
                    stats.duplicates += 1;
                    if existing.name != source.name
                        && !existing.duplicate_source_names.contains(&source.name)
                    {
                        existing.duplicate_source_names.push(source.name.clone());
                    }
                }
                None => {
                    stats.fresh += 1;
                    self.publications.push(Publication::from_item(source, item));
                }
            }
        }

        self.cursor_updates.push(CursorUpdate {
            source_id: source.id,
            cursor: latest,
        });

        stats
    }

    pub fn len(&self) -> usize {
        self.publications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publications.is_empty()
    }

    pub fn finish(self) -> IngestOutcome {
        let mut publications = self.publications;
        // Stable: equal timestamps keep source order
        publications.sort_by_key(|p| p.published_at);

        IngestOutcome {
            publications,
            cursor_updates: self.cursor_updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn source(name: &str, cursor: i64) -> Source {
        Source {
            id: Uuid::new_v4(),
            url: format!("https://{}.example/rss", name.to_lowercase()),
            name: name.to_string(),
            destinations: BTreeSet::from(["chan".to_string()]),
            cursor: ts(cursor),
            last_fetched_at: None,
            fetch_error: None,
            created_at: ts(0),
        }
    }

    fn item(at: i64, title: &str) -> FeedItem {
        FeedItem {
            published_at: ts(at),
            title: title.to_string(),
            link: format!("https://example.com/{}", title.replace(' ', "-")),
            summary: format!("About {}", title),
            author: None,
            image_url: None,
        }
    }

    #[test]
    fn test_items_are_ordered_and_cursor_reaches_latest() {
        let a = source("A", 0);
        let mut buffer = DedupBuffer::new();
        buffer.ingest(&a, vec![item(30, "third"), item(10, "first"), item(20, "second")]);

        let outcome = buffer.finish();
        let titles: Vec<_> = outcome.publications.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
        assert_eq!(
            outcome.cursor_updates,
            vec![CursorUpdate { source_id: a.id, cursor: ts(30) }]
        );
    }

    #[test]
    fn test_items_at_or_before_cursor_are_skipped() {
        let a = source("A", 20);
        let mut buffer = DedupBuffer::new();
        let stats = buffer.ingest(&a, vec![item(10, "old"), item(20, "edge"), item(25, "new")]);

        assert_eq!(stats, SourceIngest { fresh: 1, duplicates: 0 });
        assert_eq!(buffer.finish().publications[0].title, "new");
    }

    #[test]
    fn test_same_title_across_sources_is_merged() {
        let a = source("A", 0);
        let b = source("B", 0);
        let mut buffer = DedupBuffer::new();
        buffer.ingest(&a, vec![item(10, "Shared story")]);

        let mut copy = item(12, "Shared story");
        copy.link = "https://other.example/story".to_string();
        copy.summary = "Different words".to_string();
        let stats = buffer.ingest(&b, vec![copy]);
        assert_eq!(stats.duplicates, 1);

        let outcome = buffer.finish();
        assert_eq!(outcome.publications.len(), 1);
        let publication = &outcome.publications[0];
        assert_eq!(publication.source_id, a.id);
        assert_eq!(publication.link, "https://example.com/Shared-story");
        assert_eq!(publication.duplicate_source_names, vec!["B"]);
    }

    #[test]
    fn test_duplicate_only_source_still_advances() {
        let a = source("A", 0);
        let b = source("B", 0);
        let mut buffer = DedupBuffer::new();
        buffer.ingest(&a, vec![item(10, "story")]);
        buffer.ingest(&b, vec![item(15, "story")]);

        let outcome = buffer.finish();
        assert!(outcome
            .cursor_updates
            .contains(&CursorUpdate { source_id: b.id, cursor: ts(15) }));
    }

    #[test]
    fn test_nothing_new_leaves_cursor_alone() {
        let a = source("A", 100);
        let mut buffer = DedupBuffer::new();
        let stats = buffer.ingest(&a, vec![item(50, "stale")]);

        assert_eq!(stats, SourceIngest::default());
        assert!(buffer.is_empty());
        assert!(buffer.finish().cursor_updates.is_empty());
    }

    #[test]
    fn test_publications_interleave_across_sources() {
        let a = source("A", 0);
        let b = source("B", 0);
        let mut buffer = DedupBuffer::new();
        buffer.ingest(&a, vec![item(10, "a1"), item(30, "a2")]);
        buffer.ingest(&b, vec![item(20, "b1")]);

        let outcome = buffer.finish();
        let titles: Vec<_> = outcome.publications.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["a1", "b1", "a2"]);
    }
}
