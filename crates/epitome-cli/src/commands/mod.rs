pub mod daemon;
pub mod list;
pub mod register_commands;
pub mod run;
pub mod session;

use std::sync::Arc;

use anyhow::Result;

use epitome_core::{
    feed::FeedFetcher, gateway, pipeline::Pipeline, publisher::Publisher, storage::Database,
    AppConfig,
};

/// Wire the fetcher, gateway and publisher into a pipeline
pub fn build_pipeline(db: &Database, config: &AppConfig) -> Result<(Arc<Pipeline>, Arc<FeedFetcher>, Arc<Publisher>)> {
    let fetcher = Arc::new(FeedFetcher::new(config)?);
    let publisher = Arc::new(Publisher::new(
        gateway::from_config(config)?,
        config.render.message_budget,
    ));
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        fetcher.clone(),
        publisher.clone(),
        config.sync.fetch_concurrency,
    ));
    Ok((pipeline, fetcher, publisher))
}
