//! Command validation and confirmed repository changes

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use url::Url;

use super::state::{Collected, DeleteTarget, PendingAction, SourceCandidate};
use crate::commands::split_arguments;
use crate::feed::{validate_feed_url, FeedProvider, NewSource};
use crate::storage::{Database, DestinationRepository, SourceRepository};
use crate::{Error, Result};

/// Name given to feeds that do not declare a title
pub const UNTITLED_SOURCE: &str = "Untitled";

/// Discord caps select menus at 25 options
const MAX_SELECT_OPTIONS: usize = 25;

/// Hosts that need a dedicated integration rather than a feed
const UNSUPPORTED_HOSTS: &[&str] = &["twitter.com", "x.com", "instagram.com"];

fn is_unsupported_host(url: &Url) -> bool {
    url.host_str()
        .map(|host| {
            let host = host.trim_start_matches("www.").trim_start_matches("mobile.");
            UNSUPPORTED_HOSTS.contains(&host)
        })
        .unwrap_or(false)
}

pub(crate) async fn collect_sources(
    db: &Database,
    feeds: &dyn FeedProvider,
    destination_id: &str,
    raw: &str,
) -> Result<Collected> {
    let urls = split_arguments(raw);
    if urls.is_empty() {
        return Err(Error::Validation("no url given".to_string()));
    }

    let repo = SourceRepository::new(db);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut skipped = Vec::new();
    let mut duplicates = 0;

    for url in urls {
        if !seen.insert(url.clone()) {
            continue;
        }

        let parsed = match validate_feed_url(&url) {
            Ok(parsed) => parsed,
            Err(_) => {
                skipped.push(format!("{}: not a valid http(s) url", url));
                continue;
            }
        };
        if is_unsupported_host(&parsed) {
            skipped.push(format!("{}: this kind of source is not supported yet", url));
            continue;
        }

        if let Some(existing) = repo.find_by_url(&url).await? {
            if existing.destinations.contains(destination_id) {
                duplicates += 1;
                skipped.push(format!("{}: already followed here", url));
                continue;
            }
        }

        match feeds.fetch(&url).await {
            Ok(feed) => candidates.push(SourceCandidate {
                name: feed.title.unwrap_or_else(|| UNTITLED_SOURCE.to_string()),
                url,
            }),
            Err(e) => {
                tracing::debug!(url = %url, "Rejected source: {}", e);
                skipped.push(format!("{}: not a readable feed", url));
            }
        }
    }

    if candidates.is_empty() {
        let reason = skipped.join("; ");
        return Err(if duplicates > 0 && duplicates == skipped.len() {
            Error::DuplicateExists(reason)
        } else {
            Error::Validation(reason)
        });
    }

    Ok(Collected::Ready {
        action: PendingAction::AddSources(candidates),
        skipped,
    })
}

pub(crate) async fn collect_filters(
    db: &Database,
    destination_id: &str,
    raw: &str,
) -> Result<Collected> {
    let mut names: Vec<String> = Vec::new();
    for name in split_arguments(raw) {
        let name = name.to_lowercase();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if names.is_empty() {
        return Err(Error::Validation("no filter word given".to_string()));
    }

    let existing = DestinationRepository::new(db).get_filters(destination_id).await?;
    let (already, fresh): (Vec<String>, Vec<String>) =
        names.into_iter().partition(|name| existing.contains(name));

    if fresh.is_empty() {
        return Err(Error::DuplicateExists(format!(
            "already filtered on {}",
            already.join(", ")
        )));
    }

    Ok(Collected::Ready {
        action: PendingAction::AddFilters(fresh),
        skipped: already
            .into_iter()
            .map(|name| format!("{}: already a filter", name))
            .collect(),
    })
}

pub(crate) async fn collect_delete(
    db: &Database,
    destination_id: &str,
    identifier: &str,
) -> Result<Collected> {
    let needle = identifier.trim().to_lowercase();
    if needle.is_empty() {
        return Err(Error::Validation("nothing to look for".to_string()));
    }

    let sources = SourceRepository::new(db).list_for_destination(destination_id).await?;
    let filters = DestinationRepository::new(db).get_filters(destination_id).await?;
    if sources.is_empty() && filters.is_empty() {
        return Err(Error::NotFound("nothing is saved for this channel".to_string()));
    }

    let mut targets: Vec<DeleteTarget> = sources
        .into_iter()
        .filter(|s| {
            s.name.to_lowercase().contains(&needle) || s.url.to_lowercase().contains(&needle)
        })
        .map(|s| DeleteTarget::Source {
            source_id: s.id,
            name: s.name,
            url: s.url,
        })
        .collect();
    targets.extend(
        filters
            .into_iter()
            .filter(|f| *f == needle)
            .map(|name| DeleteTarget::Filter { name }),
    );

    match targets.len() {
        0 => Err(Error::NotFound(format!("nothing matches \"{}\"", identifier.trim()))),
        1 => Ok(Collected::Ready {
            action: PendingAction::Delete(targets.remove(0)),
            skipped: Vec::new(),
        }),
        n => {
            if n > MAX_SELECT_OPTIONS {
                tracing::debug!(matches = n, "Too many delete candidates, keeping the first ones");
                targets.truncate(MAX_SELECT_OPTIONS);
            }
            Ok(Collected::Choose(targets))
        }
    }
}

/// Persist a confirmed action
pub(crate) async fn apply(
    db: &Database,
    destination_id: &str,
    action: &PendingAction,
    initial_cursor: DateTime<Utc>,
) -> Result<()> {
    match action {
        PendingAction::AddSources(candidates) => {
            let new_sources: Vec<NewSource> = candidates
                .iter()
                .map(|candidate| NewSource {
                    url: candidate.url.clone(),
                    name: candidate.name.clone(),
                    cursor: initial_cursor,
                })
                .collect();
            let subscribed = SourceRepository::new(db)
                .subscribe_all(&new_sources, destination_id)
                .await?;
            for (source, outcome) in subscribed {
                tracing::info!(
                    source_id = %source.id,
                    destination_id,
                    outcome = ?outcome,
                    "Subscribed source"
                );
            }
            Ok(())
        }
        PendingAction::AddFilters(names) => {
            DestinationRepository::new(db)
                .add_filters(destination_id, names)
                .await?;
            Ok(())
        }
        PendingAction::Delete(DeleteTarget::Source { source_id, .. }) => {
            SourceRepository::new(db)
                .remove_destination(*source_id, destination_id)
                .await?;
            Ok(())
        }
        PendingAction::Delete(DeleteTarget::Filter { name }) => {
            if DestinationRepository::new(db)
                .remove_filter(destination_id, name)
                .await?
            {
                Ok(())
            } else {
                Err(Error::NotFound(format!("filter \"{}\"", name)))
            }
        }
    }
}
