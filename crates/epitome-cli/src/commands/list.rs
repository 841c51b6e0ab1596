use anyhow::Result;

use epitome_core::storage::{Database, DestinationRepository, SourceRepository};

pub async fn run(db: &Database, channel: Option<&str>) -> Result<()> {
    let source_repo = SourceRepository::new(db);
    let sources = match channel {
        Some(channel) => source_repo.list_for_destination(channel).await?,
        None => source_repo.list_all().await?,
    };

    if sources.is_empty() {
        println!("No source configured.");
        println!("\nTo follow a feed, run:");
        println!("  epitome session -u <user> -c <channel> add-source <url>");
    } else {
        println!("Sources ({}):\n", sources.len());
    }

    for source in &sources {
        let error = if let Some(err) = &source.fetch_error {
            format!(" [ERROR: {}]", err)
        } else {
            String::new()
        };

        println!("  {}{}", source.name, error);
        println!("    URL: {}", source.url);
        if channel.is_none() {
            let channels: Vec<&str> = source.destinations.iter().map(String::as_str).collect();
            println!("    Channels: {}", channels.join(", "));
        }
        println!("    Cursor: {}", source.cursor.format("%Y-%m-%d %H:%M"));
        if let Some(last) = source.last_fetched_at {
            println!("    Last fetched: {}", last.format("%Y-%m-%d %H:%M"));
        }
        println!();
    }

    if let Some(channel) = channel {
        match DestinationRepository::new(db).get(channel).await? {
            None => println!("Channel {} is not known.", channel),
            Some(destination) if destination.filters.is_empty() => {
                println!("No filter: every publication is posted.");
            }
            Some(destination) => {
                let filters: Vec<&str> = destination.filters.iter().map(String::as_str).collect();
                println!("Filters: {}", filters.join(", "));
            }
        }
    }

    Ok(())
}
