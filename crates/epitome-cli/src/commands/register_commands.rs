use anyhow::Result;

use epitome_core::{commands, gateway, AppConfig};

pub async fn run(config: &AppConfig) -> Result<()> {
    let gateway = gateway::from_config(config)?;
    gateway.register_commands(&commands::schema()).await?;
    println!("Slash commands registered.");
    Ok(())
}
