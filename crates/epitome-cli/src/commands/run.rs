use anyhow::Result;

use epitome_core::{ipc::is_daemon_running, storage::Database, AppConfig, DaemonClient};

use super::build_pipeline;

/// Run the pipeline once, through the daemon when it is up so runs never overlap
pub async fn run(config: &AppConfig) -> Result<()> {
    let socket_path = config.socket_path();

    let report = if is_daemon_running(&socket_path).await {
        println!("Asking the daemon for a run...\n");
        DaemonClient::new(socket_path).run_pipeline().await?
    } else {
        println!("Running the pipeline...\n");
        let db = Database::new(config).await?;
        let (pipeline, _, _) = build_pipeline(&db, config)?;
        pipeline.run().await?
    };

    println!(
        "Run complete. {} sources ({} failed), {} publications, {} delivered, {} failed deliveries.",
        report.sources,
        report.failed_sources,
        report.publications,
        report.delivered,
        report.failed_deliveries
    );
    if report.failed_cursor_updates > 0 {
        println!(
            "{} cursors could not be saved; those sources will be read again next run.",
            report.failed_cursor_updates
        );
    }

    Ok(())
}
