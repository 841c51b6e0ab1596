use anyhow::{bail, Result};

use epitome_core::{
    commands::Command,
    ipc::is_daemon_running,
    session::{Interaction, SessionReply},
    AppConfig, DaemonClient,
};

use crate::SessionAction;

/// Forward a user command or interaction to the daemon, which owns sessions
pub async fn run(config: &AppConfig, user: &str, channel: &str, action: SessionAction) -> Result<()> {
    let socket_path = config.socket_path();
    if !is_daemon_running(&socket_path).await {
        bail!("Daemon is not running. Start it with 'epitome daemon start'.");
    }
    let client = DaemonClient::new(socket_path);

    let reply = match action {
        SessionAction::AddSource { urls } => {
            let command = Command::AddSource { urls: urls.join(" ") };
            client.session_command(user, channel, command).await?
        }
        SessionAction::AddFilter { names } => {
            let command = Command::AddFilter { names: names.join(" ") };
            client.session_command(user, channel, command).await?
        }
        SessionAction::Delete { identifier } => {
            client.session_command(user, channel, Command::Delete { identifier }).await?
        }
        SessionAction::List => client.session_command(user, channel, Command::List).await?,
        SessionAction::Cancel => client.session_command(user, channel, Command::Cancel).await?,
        SessionAction::Help => client.session_command(user, channel, Command::Help).await?,
        SessionAction::Confirm { session } => {
            client.session_interaction(user, session, Interaction::Confirm).await?
        }
        SessionAction::Reject { session } => {
            client.session_interaction(user, session, Interaction::Cancel).await?
        }
        SessionAction::Select { session, index } => {
            client
                .session_interaction(user, session, Interaction::Select(index))
                .await?
        }
    };

    print_reply(&reply);
    Ok(())
}

fn print_reply(reply: &SessionReply) {
    if reply.ignored {
        println!("Nothing happened: no matching procedure is waiting for this.");
    }
    if let Some(kind) = &reply.message {
        println!("Sent: {}", kind);
    }
    match &reply.session {
        Some(session) => println!(
            "Session {} ({}) is {}",
            session.id, session.command, session.state
        ),
        None => println!("No procedure in progress."),
    }
}
