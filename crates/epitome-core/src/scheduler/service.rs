use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::pipeline::{Pipeline, RunReport};
use crate::Result;

/// Outcome of the most recent completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRun {
    pub finished_at: DateTime<Utc>,
    pub report: RunReport,
}

/// Drives the pipeline once at startup and then on a fixed interval.
///
/// Runs never overlap: scheduled and manual runs share one lock, so a run
/// requested while another is in flight waits for it to finish.
pub struct SchedulerService {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    run_lock: Mutex<()>,
    last_run: RwLock<Option<LastRun>>,
}

impl SchedulerService {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            run_lock: Mutex::new(()),
            last_run: RwLock::new(None),
        }
    }

    /// Run until the shutdown signal flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.interval.is_zero() {
            info!("Periodic refresh disabled (refresh_interval_secs = 0), running once");
            if let Err(e) = self.run_now().await {
                error!("Startup run failed: {}", e);
            }
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("Scheduler stopped");
            return;
        }

        info!("Scheduler started: interval={}s", self.interval.as_secs());

        // First tick completes immediately, giving the startup run
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    debug!("Running scheduled ingestion");
                    if let Err(e) = self.run_now().await {
                        error!("Scheduled run failed: {}", e);
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run the pipeline now, waiting for any run in progress
    pub async fn run_now(&self) -> Result<RunReport> {
        let _guard = self.run_lock.lock().await;
        let report = self.pipeline.run().await?;

        *self.last_run.write().await = Some(LastRun {
            finished_at: Utc::now(),
            report,
        });
        Ok(report)
    }

    pub async fn last_run(&self) -> Option<LastRun> {
        self.last_run.read().await.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedItem, NewSource};
    use crate::pipeline::testing::StaticFeeds;
    use crate::publisher::testing::RecordingGateway;
    use crate::publisher::Publisher;
    use crate::render::MESSAGE_BUDGET;
    use crate::storage::{Database, SourceRepository};

    async fn scheduler(interval: Duration) -> (Arc<SchedulerService>, Arc<StaticFeeds>, Database) {
        let db = Database::new_in_memory().await.unwrap();
        let feeds = Arc::new(StaticFeeds::default());
        let publisher = Arc::new(Publisher::new(Arc::new(RecordingGateway::default()), MESSAGE_BUDGET));
        let pipeline = Arc::new(Pipeline::new(db.clone(), feeds.clone(), publisher, 1));
        (Arc::new(SchedulerService::new(pipeline, interval)), feeds, db)
    }

    async fn wait_for_run(service: &SchedulerService, after: Option<DateTime<Utc>>) -> LastRun {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(last) = service.last_run().await {
                    if after.map_or(true, |t| last.finished_at > t) {
                        return last;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduled run")
    }

    #[tokio::test]
    async fn test_runs_at_startup_then_on_interval() {
        let (service, feeds, db) = scheduler(Duration::from_millis(200)).await;
        SourceRepository::new(&db)
            .add_source(
                &NewSource {
                    url: "https://a.example/rss".to_string(),
                    name: "A".to_string(),
                    cursor: DateTime::<Utc>::default(),
                },
                "chan",
            )
            .await
            .unwrap();
        feeds.set(
            "https://a.example/rss",
            None,
            vec![FeedItem {
                published_at: DateTime::<Utc>::from_timestamp(10, 0).unwrap(),
                title: "hello".to_string(),
                link: "https://a.example/hello".to_string(),
                summary: "world".to_string(),
                author: None,
                image_url: None,
            }],
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(service.clone().run(shutdown_rx));

        let first = wait_for_run(&service, None).await;
        assert_eq!(first.report.delivered, 1);

        let second = wait_for_run(&service, Some(first.finished_at)).await;
        assert_eq!(second.report.delivered, 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_runs_once_then_waits_for_shutdown() {
        let (service, _, _) = scheduler(Duration::ZERO).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(service.clone().run(shutdown_rx));

        let startup = wait_for_run(&service, None).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let last = service.last_run().await.unwrap();
        assert_eq!(last.finished_at, startup.finished_at);
        assert!(!handle.is_finished());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
