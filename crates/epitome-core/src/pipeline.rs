use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::feed::{FeedProvider, FetchedFeed, Source};
use crate::ingest::DedupBuffer;
use crate::publisher::Publisher;
use crate::router::route;
use crate::storage::{Database, DestinationRepository, SourceRepository};
use crate::{Error, Result};

/// Summary of one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub sources: u32,
    pub failed_sources: u32,
    pub publications: u32,
    pub delivered: u32,
    pub failed_deliveries: u32,
    pub failed_cursor_updates: u32,
}

/// One full fetch, dedup, route, publish pass
pub struct Pipeline {
    db: Database,
    feeds: Arc<dyn FeedProvider>,
    publisher: Arc<Publisher>,
    fetch_concurrency: usize,
}

impl Pipeline {
    pub fn new(
        db: Database,
        feeds: Arc<dyn FeedProvider>,
        publisher: Arc<Publisher>,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            db,
            feeds,
            publisher,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Execute one run.
    ///
    /// Per-source fetch failures and per-message delivery failures are
    /// contained. Cursors are only written after delivery, so a crash in the
    /// middle of a run leads to reposts rather than lost items.
    pub async fn run(&self) -> Result<RunReport> {
        let source_repo = SourceRepository::new(&self.db);
        let sources = source_repo.list_all().await?;
        let mut report = RunReport {
            sources: sources.len() as u32,
            ..RunReport::default()
        };

        if sources.is_empty() {
            tracing::debug!("No sources to ingest");
            return Ok(report);
        }

        tracing::info!("Ingesting {} sources", sources.len());
        let fetched = self.fetch_all(&sources).await;

        let mut buffer = DedupBuffer::new();
        for (source, result) in sources.iter().zip(fetched) {
            match result {
                Ok(feed) => {
                    let stats = buffer.ingest(source, feed.items);
                    tracing::debug!(
                        source = %source.name,
                        fresh = stats.fresh,
                        duplicates = stats.duplicates,
                        "Source ingested"
                    );
                    if let Err(e) = source_repo.record_fetch_success(source.id).await {
                        tracing::warn!(source = %source.name, "Failed to record fetch: {}", e);
                    }
                }
                Err(e) => {
                    tracing::error!(source = %source.name, url = %source.url, "Fetch failed: {}", e);
                    report.failed_sources += 1;
                    if let Err(e) = source_repo.record_fetch_error(source.id, &e.to_string()).await {
                        tracing::warn!(source = %source.name, "Failed to record fetch error: {}", e);
                    }
                }
            }
        }

        let outcome = buffer.finish();
        report.publications = outcome.publications.len() as u32;

        let destinations = DestinationRepository::new(&self.db);
        let routing = route(&outcome.publications, &sources, &destinations).await;
        let published = self.publisher.publish(routing).await;
        report.delivered = published.delivered;
        report.failed_deliveries = published.failed;

        for update in outcome.cursor_updates {
            if let Err(e) = source_repo.advance_cursor(update.source_id, update.cursor).await {
                tracing::error!(source_id = %update.source_id, "Failed to advance cursor: {}", e);
                report.failed_cursor_updates += 1;
            }
        }

        tracing::info!(
            sources = report.sources,
            failed_sources = report.failed_sources,
            publications = report.publications,
            delivered = report.delivered,
            failed_deliveries = report.failed_deliveries,
            failed_cursor_updates = report.failed_cursor_updates,
            "Run complete"
        );
        Ok(report)
    }

    /// Fetch every source with bounded concurrency; results keep source order
    async fn fetch_all(&self, sources: &[Source]) -> Vec<Result<FetchedFeed>> {
        let mut results: Vec<Option<Result<FetchedFeed>>> = (0..sources.len()).map(|_| None).collect();
        let mut join_set: JoinSet<(usize, Result<FetchedFeed>)> = JoinSet::new();
        let mut pending = sources.iter().enumerate();

        fn spawn_fetch(
            join_set: &mut JoinSet<(usize, Result<FetchedFeed>)>,
            feeds: Arc<dyn FeedProvider>,
            index: usize,
            url: String,
        ) {
            join_set.spawn(async move { (index, feeds.fetch(&url).await) });
        }

        for _ in 0..self.fetch_concurrency {
            if let Some((index, source)) = pending.next() {
                spawn_fetch(&mut join_set, Arc::clone(&self.feeds), index, source.url.clone());
            }
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!("Fetch task failed: {}", e),
            }

            if let Some((index, source)) = pending.next() {
                spawn_fetch(&mut join_set, Arc::clone(&self.feeds), index, source.url.clone());
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::Fetch("fetch task aborted".to_string()))))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::feed::{FeedItem, FeedProvider, FetchedFeed};
    use crate::{Error, Result};

    /// In-memory feeds keyed by url; unknown urls fail to fetch
    #[derive(Default)]
    pub struct StaticFeeds {
        feeds: Mutex<HashMap<String, FetchedFeed>>,
    }

    impl StaticFeeds {
        pub fn set(&self, url: &str, title: Option<&str>, items: Vec<FeedItem>) {
            self.feeds.lock().unwrap().insert(
                url.to_string(),
                FetchedFeed {
                    title: title.map(str::to_string),
                    items,
                },
            );
        }
    }

    #[async_trait]
    impl FeedProvider for StaticFeeds {
        async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
            self.feeds
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| Error::Fetch(format!("unreachable: {}", url)))
        }
    }
}
