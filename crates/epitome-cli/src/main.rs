use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use epitome_core::{storage::Database, AppConfig};

mod commands;

#[derive(Parser)]
#[command(name = "epitome")]
#[command(author, version, about = "Publish news feeds into chat channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Background daemon running the scheduler and user sessions
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Fetch every source once and publish new items
    Run,
    /// List followed sources
    List {
        /// Only show sources and filters of this channel
        #[arg(short, long)]
        channel: Option<String>,
    },
    /// Publish the slash-command schema to the chat platform
    RegisterCommands,
    /// Act as a chat user talking to the daemon
    Session {
        /// User issuing the command
        #[arg(short, long)]
        user: String,
        /// Channel the command is issued in
        #[arg(short, long)]
        channel: String,
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the background daemon
    Start,
    /// Stop the background daemon
    Stop,
    /// Check daemon status
    Status,
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Follow one or more feeds
    AddSource { urls: Vec<String> },
    /// Add keyword filters
    AddFilter { names: Vec<String> },
    /// Remove a source or a filter
    Delete { identifier: String },
    /// List sources and filters of the channel
    List,
    /// Cancel the procedure in progress
    Cancel,
    /// Show the help message
    Help,
    /// Press the confirm button
    Confirm {
        #[arg(short, long)]
        session: Uuid,
    },
    /// Press the cancel button
    Reject {
        #[arg(short, long)]
        session: Uuid,
    },
    /// Pick an entry from a selection menu
    Select {
        #[arg(short, long)]
        session: Uuid,
        index: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(AppConfig::load()?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start => {
                let db = Database::new(&config).await?;
                commands::daemon::start(db, config).await
            }
            DaemonAction::Stop => commands::daemon::stop().await,
            DaemonAction::Status => commands::daemon::status(&config).await,
        },
        Commands::Run => commands::run::run(&config).await,
        Commands::List { channel } => {
            let db = Database::new(&config).await?;
            commands::list::run(&db, channel.as_deref()).await
        }
        Commands::RegisterCommands => commands::register_commands::run(&config).await,
        Commands::Session { user, channel, action } => {
            commands::session::run(&config, &user, &channel, action).await
        }
    }
}
