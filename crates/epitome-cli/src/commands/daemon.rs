use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use epitome_core::{
    ipc::{DaemonClient, DaemonContext},
    scheduler::SchedulerService,
    session::{SessionManager, SessionStore},
    storage::Database,
    AppConfig, DaemonServer,
};

use super::build_pipeline;

fn pid_file_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("epitome")
        .join("daemon.pid")
}

/// PID of the running daemon, if any
fn running_pid() -> Option<u32> {
    let pid_path = pid_file_path();
    if !pid_path.exists() {
        return None;
    }

    let mut file = fs::File::open(&pid_path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;

    #[cfg(unix)]
    {
        use std::process::Command;
        let output = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .output()
            .ok()?;
        if output.status.success() {
            return Some(pid);
        }
    }

    // Stale PID file
    let _ = fs::remove_file(&pid_path);
    None
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(&pid_path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Start the daemon
pub async fn start(db: Database, config: Arc<AppConfig>) -> Result<()> {
    if let Some(pid) = running_pid() {
        println!("Daemon is already running (PID: {})", pid);
        return Ok(());
    }

    println!("Starting epitome daemon...");
    write_pid_file()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let (pipeline, fetcher, publisher) = build_pipeline(&db, &config)?;
    let scheduler = Arc::new(SchedulerService::new(
        pipeline,
        Duration::from_secs(config.sync.refresh_interval_secs),
    ));
    let sessions = SessionManager::new(
        db.clone(),
        fetcher,
        publisher,
        SessionStore::new(),
        config.session.timeout(),
    )
    .with_backlog(config.sync.deliver_backlog);

    let server = DaemonServer::new(
        DaemonContext::new(db, scheduler.clone(), sessions),
        config.socket_path(),
    );

    println!(
        "Daemon started (PID: {}). Press Ctrl+C or run 'epitome daemon stop' to stop.",
        std::process::id()
    );
    println!("  Refresh interval: {} seconds", config.sync.refresh_interval_secs);
    println!("  Session timeout: {} seconds", config.session.timeout_secs);
    println!("  Socket: {}", config.socket_path().display());

    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    if let Err(e) = server.run(shutdown_rx).await {
        error!("IPC server failed: {}", e);
    }
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }

    remove_pid_file();
    println!("Daemon stopped.");

    Ok(())
}

/// Stop the daemon
pub async fn stop() -> Result<()> {
    match running_pid() {
        Some(pid) => {
            println!("Stopping daemon (PID: {})...", pid);

            #[cfg(unix)]
            {
                use std::process::Command;
                let output = Command::new("kill")
                    .arg("-TERM")
                    .arg(pid.to_string())
                    .output()?;

                if output.status.success() {
                    tokio::time::sleep(Duration::from_secs(2)).await;

                    if running_pid().is_none() {
                        println!("Daemon stopped successfully.");
                    } else {
                        let _ = Command::new("kill").arg("-9").arg(pid.to_string()).output();
                        remove_pid_file();
                        println!("Daemon forcefully terminated.");
                    }
                } else {
                    println!("Failed to stop daemon. You may need to kill it manually: kill {}", pid);
                }
            }

            #[cfg(not(unix))]
            {
                println!("Please stop the daemon manually (PID: {})", pid);
            }
        }
        None => {
            println!("Daemon is not running.");
        }
    }

    Ok(())
}

/// Show daemon status
pub async fn status(config: &AppConfig) -> Result<()> {
    let Some(pid) = running_pid() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Daemon is running (PID: {})", pid);
    println!("PID file: {}", pid_file_path().display());

    let client = DaemonClient::new(config.socket_path());
    match client.status().await {
        Ok(status) => {
            println!("Uptime: {} seconds", status.uptime_secs);
            println!("Refresh interval: {} seconds", status.refresh_interval_secs);
            println!("Active sessions: {}", status.active_sessions);
            match status.last_run {
                Some(last) => println!(
                    "Last run: {} ({} sources, {} failed, {} delivered)",
                    last.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    last.report.sources,
                    last.report.failed_sources,
                    last.report.delivered
                ),
                None => println!("Last run: never"),
            }
        }
        Err(e) => println!("Socket not reachable: {}", e),
    }

    Ok(())
}
