//! Message kinds and the size-bounded chunker
//!
//! Every user-visible message is one [`OutboundMessage`] variant. Rendering
//! produces the textual body, which is then split on line boundaries into
//! segments that fit the chat platform's per-message budget.

use serde::Serialize;
use uuid::Uuid;

use crate::feed::{Publication, Source};
use crate::session::{DeleteTarget, PendingAction, SourceCandidate};

/// Characters allowed in one chat message
pub const MESSAGE_BUDGET: usize = 2000;

/// Kind of interactive control a message can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

/// Interactive control attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    Button {
        custom_id: String,
        label: String,
        style: ButtonStyle,
    },
    SelectMenu {
        custom_id: String,
        placeholder: String,
        options: Vec<SelectOption>,
    },
}

/// One message segment as handed to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub content: String,
    pub components: Vec<Component>,
}

/// Everything the bot can say
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Post {
        publication: Publication,
        matched_filters: Vec<String>,
    },
    Help,
    List {
        sources: Vec<Source>,
        filters: Vec<String>,
    },
    AddSourceConfirm {
        session_id: Uuid,
        candidates: Vec<SourceCandidate>,
        skipped: Vec<String>,
    },
    AddFilterConfirm {
        session_id: Uuid,
        names: Vec<String>,
        skipped: Vec<String>,
    },
    DeleteSelect {
        session_id: Uuid,
        targets: Vec<DeleteTarget>,
    },
    DeleteConfirm {
        session_id: Uuid,
        target: DeleteTarget,
    },
    SourcesAdded {
        names: Vec<String>,
    },
    FiltersAdded {
        names: Vec<String>,
    },
    Deleted {
        target: DeleteTarget,
    },
    Cancelled,
    TimedOut,
    Error {
        reason: String,
    },
}

impl OutboundMessage {
    /// Confirmation prompt for a pending action
    pub fn confirm(session_id: Uuid, action: PendingAction, skipped: Vec<String>) -> Self {
        match action {
            PendingAction::AddSources(candidates) => OutboundMessage::AddSourceConfirm {
                session_id,
                candidates,
                skipped,
            },
            PendingAction::AddFilters(names) => OutboundMessage::AddFilterConfirm {
                session_id,
                names,
                skipped,
            },
            PendingAction::Delete(target) => OutboundMessage::DeleteConfirm { session_id, target },
        }
    }

    /// Success acknowledgement for an applied action
    pub fn applied(action: PendingAction) -> Self {
        match action {
            PendingAction::AddSources(candidates) => OutboundMessage::SourcesAdded {
                names: candidates.into_iter().map(|c| c.name).collect(),
            },
            PendingAction::AddFilters(names) => OutboundMessage::FiltersAdded { names },
            PendingAction::Delete(target) => OutboundMessage::Deleted { target },
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        OutboundMessage::Error {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Post { .. } => "post",
            OutboundMessage::Help => "help",
            OutboundMessage::List { .. } => "list",
            OutboundMessage::AddSourceConfirm { .. } => "add_source_confirm",
            OutboundMessage::AddFilterConfirm { .. } => "add_filter_confirm",
            OutboundMessage::DeleteSelect { .. } => "delete_select",
            OutboundMessage::DeleteConfirm { .. } => "delete_confirm",
            OutboundMessage::SourcesAdded { .. } => "sources_added",
            OutboundMessage::FiltersAdded { .. } => "filters_added",
            OutboundMessage::Deleted { .. } => "deleted",
            OutboundMessage::Cancelled => "cancelled",
            OutboundMessage::TimedOut => "timed_out",
            OutboundMessage::Error { .. } => "error",
        }
    }

    /// Text body, before chunking
    pub fn body(&self) -> String {
        match self {
            OutboundMessage::Post {
                publication,
                matched_filters,
            } => render_post(publication, matched_filters),
            OutboundMessage::Help => HELP_TEXT.to_string(),
            OutboundMessage::List { sources, filters } => render_list(sources, filters),
            OutboundMessage::AddSourceConfirm {
                candidates, skipped, ..
            } => {
                let mut lines = vec!["**Add sources**".to_string(), "You are about to follow:".to_string()];
                lines.extend(candidates.iter().map(|c| format!("> {} <{}>", c.name, c.url)));
                push_skipped(&mut lines, skipped);
                lines.join("\n")
            }
            OutboundMessage::AddFilterConfirm { names, skipped, .. } => {
                let mut lines = vec![
                    "**Add filters**".to_string(),
                    "Only publications mentioning one of these words will be posted here:".to_string(),
                ];
                lines.extend(names.iter().map(|n| format!("> {}", n)));
                push_skipped(&mut lines, skipped);
                lines.join("\n")
            }
            OutboundMessage::DeleteSelect { targets, .. } => {
                let mut lines = vec![
                    "**Delete**".to_string(),
                    "Several saved items match. Pick the one to delete:".to_string(),
                ];
                lines.extend(
                    targets
                        .iter()
                        .enumerate()
                        .map(|(i, t)| format!("{}. {}", i + 1, t.label())),
                );
                lines.join("\n")
            }
            OutboundMessage::DeleteConfirm { target, .. } => {
                format!("**Delete**\nYou are about to delete:\n> {}", target.label())
            }
            OutboundMessage::SourcesAdded { names } => format!(
                "**Sources added**\n{}\nNew publications will be shared in this channel. Use `/list` to review followed sources.",
                names.join(", ")
            ),
            OutboundMessage::FiltersAdded { names } => {
                format!("**Filters added**\n{}", names.join(", "))
            }
            OutboundMessage::Deleted { target } => match target {
                DeleteTarget::Source { name, .. } => format!(
                    "**Source deleted**\n{} will no longer be posted in this channel.",
                    name
                ),
                DeleteTarget::Filter { name } => format!("**Filter deleted**\n{}", name),
            },
            OutboundMessage::Cancelled => "**Procedure cancelled**".to_string(),
            OutboundMessage::TimedOut => {
                "**Procedure expired**\nNo answer was received in time; nothing was changed.".to_string()
            }
            OutboundMessage::Error { reason } => {
                format!("**Error**\nSomething went wrong.\nReason: \"{}\"", reason)
            }
        }
    }

    /// Interactive controls, carried by the first segment only
    pub fn components(&self) -> Vec<Component> {
        match self {
            OutboundMessage::AddSourceConfirm { session_id, .. }
            | OutboundMessage::AddFilterConfirm { session_id, .. }
            | OutboundMessage::DeleteConfirm { session_id, .. } => confirm_buttons(*session_id),
            OutboundMessage::DeleteSelect { session_id, targets } => vec![Component::SelectMenu {
                custom_id: component_id("select", *session_id),
                placeholder: "Item to delete".to_string(),
                options: targets
                    .iter()
                    .enumerate()
                    .map(|(i, t)| SelectOption {
                        label: truncate_chars(&t.label(), 100),
                        value: i.to_string(),
                    })
                    .collect(),
            }],
            _ => Vec::new(),
        }
    }

    /// Render into ordered segments no longer than `budget` characters
    pub fn render(&self, budget: usize) -> Vec<RenderedMessage> {
        let mut components = Some(self.components());
        chunk(&self.body(), budget)
            .into_iter()
            .map(|content| RenderedMessage {
                content,
                components: components.take().unwrap_or_default(),
            })
            .collect()
    }
}

const HELP_TEXT: &str = "**Epitome here**
I keep this channel up to date with the news sources you follow. Tell me what to follow and I will post the latest publications here.

Commands:
- `/add-source <urls>` follow one or more feeds
- `/add-filter <words>` only post publications mentioning one of these words
- `/delete <name>` stop following a source or remove a filter
- `/list` list followed sources and filters
- `/cancel` cancel the procedure in progress
- `/help` show this message";

fn render_post(publication: &Publication, matched_filters: &[String]) -> String {
    let mut lines = vec![
        format!(
            "**{}** · {}",
            publication.name,
            publication.published_at.format("%Y-%m-%d %H:%M UTC")
        ),
        format!("**{}**", publication.title),
        publication.summary.clone(),
        publication.link.clone(),
    ];
    if let Some(author) = &publication.author {
        lines.push(format!("By {}", author));
    }
    if !publication.duplicate_source_names.is_empty() {
        lines.push(format!(
            "Also published by: {}",
            publication.duplicate_source_names.join(", ")
        ));
    }
    if !matched_filters.is_empty() {
        lines.push(format!("Filters: {}", matched_filters.join(", ")));
    }
    // Last, so the chat client embeds it below the text
    if let Some(image_url) = &publication.image_url {
        lines.push(image_url.clone());
    }
    lines.join("\n")
}

fn render_list(sources: &[Source], filters: &[String]) -> String {
    let mut lines = vec!["**Followed sources**".to_string()];
    if sources.is_empty() {
        lines.push("No source configured.".to_string());
    }
    for source in sources {
        let marker = if source.has_error() { " (last fetch failed)" } else { "" };
        lines.push(format!("- {} <{}>{}", source.name, source.url, marker));
    }
    if !filters.is_empty() {
        lines.push("**Filters**".to_string());
        lines.push(filters.join(", "));
    }
    lines.join("\n")
}

fn push_skipped(lines: &mut Vec<String>, skipped: &[String]) {
    if !skipped.is_empty() {
        lines.push("Skipped:".to_string());
        lines.extend(skipped.iter().map(|s| format!("- {}", s)));
    }
}

/// Custom id carried by a component, `<action>:<session id>`
pub fn component_id(action: &str, session_id: Uuid) -> String {
    format!("{}:{}", action, session_id)
}

fn confirm_buttons(session_id: Uuid) -> Vec<Component> {
    vec![
        Component::Button {
            custom_id: component_id("confirm", session_id),
            label: "Confirm".to_string(),
            style: ButtonStyle::Success,
        },
        Component::Button {
            custom_id: component_id("cancel", session_id),
            label: "Cancel".to_string(),
            style: ButtonStyle::Danger,
        },
    ]
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Split a body into the fewest ordered segments of at most `budget` characters.
///
/// Lines are never broken unless a single line is longer than the budget on
/// its own. Joining the segments with `\n` gives back the original body.
pub fn chunk(body: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut segments = Vec::new();
    let mut current: Option<(String, usize)> = None;

    for line in body.split('\n') {
        let len = line.chars().count();

        if len > budget {
            if let Some((segment, _)) = current.take() {
                segments.push(segment);
            }
            let chars: Vec<char> = line.chars().collect();
            let mut pieces = chars.chunks(budget).map(|c| c.iter().collect::<String>());
            let last = pieces.next_back();
            segments.extend(pieces);
            current = last.map(|piece| {
                let n = piece.chars().count();
                (piece, n)
            });
            continue;
        }

        current = match current.take() {
            None => Some((line.to_string(), len)),
            Some((mut segment, used)) if used + 1 + len <= budget => {
                segment.push('\n');
                segment.push_str(line);
                Some((segment, used + 1 + len))
            }
            Some((segment, _)) => {
                segments.push(segment);
                Some((line.to_string(), len))
            }
        };
    }

    if let Some((segment, _)) = current {
        segments.push(segment);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_4500_chars_make_three_segments() {
        // 7 lines of 642 chars joined by newlines: 4500 chars
        let line = "x".repeat(642);
        let body = vec![line.as_str(); 7].join("\n");
        assert_eq!(body.chars().count(), 4500);

        let segments = chunk(&body, MESSAGE_BUDGET);
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.chars().count() <= MESSAGE_BUDGET));
        assert!(segments.iter().flat_map(|s| s.split('\n')).all(|l| l == line));
        assert_eq!(segments.join("\n"), body);
    }

    #[test]
    fn test_short_body_is_one_segment() {
        assert_eq!(chunk("hello\nworld", MESSAGE_BUDGET), vec!["hello\nworld"]);
        assert_eq!(chunk("", MESSAGE_BUDGET), vec![""]);
    }

    #[test]
    fn test_blank_lines_survive_chunking() {
        let body = "aaaa\n\nbbbb\n\ncccc";
        let segments = chunk(body, 6);
        assert!(segments.iter().all(|s| s.chars().count() <= 6));
        assert_eq!(segments.join("\n"), body);
    }

    #[test]
    fn test_oversized_line_is_hard_split() {
        let body = format!("head\n{}", "y".repeat(25));
        let segments = chunk(&body, 10);
        assert_eq!(segments, vec!["head", "yyyyyyyyyy", "yyyyyyyyyy", "yyyyy"]);
    }

    #[test]
    fn test_multibyte_chars_count_once() {
        let line = "é".repeat(10);
        let segments = chunk(&format!("{}\n{}", line, line), 10);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_only_first_segment_has_components() {
        let session_id = Uuid::new_v4();
        let message = OutboundMessage::AddFilterConfirm {
            session_id,
            names: (0..400).map(|i| format!("keyword{}", i)).collect(),
            skipped: vec![],
        };

        let rendered = message.render(MESSAGE_BUDGET);
        assert!(rendered.len() > 1);
        assert_eq!(rendered[0].components.len(), 2);
        assert!(rendered[1..].iter().all(|m| m.components.is_empty()));
        assert_eq!(
            rendered[0].components[0],
            Component::Button {
                custom_id: format!("confirm:{}", session_id),
                label: "Confirm".to_string(),
                style: ButtonStyle::Success,
            }
        );
    }

    #[test]
    fn test_post_mentions_duplicates_and_filters() {
        let publication = Publication {
            source_id: Uuid::new_v4(),
            name: "Le Monde".to_string(),
            title: "Cats everywhere".to_string(),
            link: "https://example.com/cats".to_string(),
            summary: "A story about cats".to_string(),
            author: Some("Jane".to_string()),
            published_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            image_url: None,
            duplicate_source_names: vec!["Libération".to_string()],
        };

        let body = OutboundMessage::Post {
            publication,
            matched_filters: vec!["cat".to_string()],
        }
        .body();

        assert!(body.starts_with("**Le Monde** · 1970-01-01 00:00 UTC"));
        assert!(body.contains("Also published by: Libération"));
        assert!(body.contains("Filters: cat"));
        assert!(body.contains("By Jane"));
        assert_eq!(body.lines().last(), Some("Filters: cat"));
    }

    #[test]
    fn test_list_marks_failing_sources() {
        let source = Source {
            id: Uuid::new_v4(),
            url: "https://example.com/rss".to_string(),
            name: "Example".to_string(),
            destinations: ["chan".to_string()].into_iter().collect(),
            cursor: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            last_fetched_at: None,
            fetch_error: Some("timed out".to_string()),
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        let message = OutboundMessage::List {
            sources: vec![source.clone()],
            filters: vec!["rust".to_string()],
        };

        assert_eq!(
            message,
            OutboundMessage::List { sources: vec![source], filters: vec!["rust".to_string()] }
        );
        assert!(message.body().contains("- Example <https://example.com/rss> (last fetch failed)"));
        assert!(message.body().contains("rust"));
    }

    #[test]
    fn test_post_ends_with_its_image() {
        let publication = Publication {
            source_id: Uuid::new_v4(),
            name: "Example".to_string(),
            title: "Sunset".to_string(),
            link: "https://example.com/sunset".to_string(),
            summary: "Pictures of the evening".to_string(),
            author: None,
            published_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            image_url: Some("https://example.com/sunset.jpg".to_string()),
            duplicate_source_names: vec![],
        };

        let body = OutboundMessage::Post {
            publication,
            matched_filters: vec![],
        }
        .body();

        assert_eq!(body.lines().last(), Some("https://example.com/sunset.jpg"));
    }

    #[test]
    fn test_select_menu_lists_targets() {
        let session_id = Uuid::new_v4();
        let message = OutboundMessage::DeleteSelect {
            session_id,
            targets: vec![
                DeleteTarget::Filter { name: "rust".to_string() },
                DeleteTarget::Filter { name: "rusty".to_string() },
            ],
        };

        match &message.components()[..] {
            [Component::SelectMenu { custom_id, options, .. }] => {
                assert_eq!(custom_id, &format!("select:{}", session_id));
                assert_eq!(options.len(), 2);
                assert_eq!(options[1].value, "1");
            }
            other => panic!("unexpected components: {:?}", other),
        }
    }
}
