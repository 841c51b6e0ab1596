use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A slash command as received from a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum Command {
    AddSource { urls: String },
    AddFilter { names: String },
    Delete { identifier: String },
    List,
    Cancel,
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddSource { .. } => "add-source",
            Command::AddFilter { .. } => "add-filter",
            Command::Delete { .. } => "delete",
            Command::List => "list",
            Command::Cancel => "cancel",
            Command::Help => "help",
        }
    }
}

/// Split a free-text argument on whitespace and commas
pub fn split_arguments(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

const STRING_OPTION: u8 = 3;

fn string_option(name: &str, description: &str) -> Value {
    json!({
        "type": STRING_OPTION,
        "name": name,
        "description": description,
        "required": true,
    })
}

/// Slash-command registration payload
pub fn schema() -> Value {
    json!([
        {
            "name": "add-source",
            "description": "Follow one or more news feeds in this channel",
            "options": [string_option("urls", "Feed urls, separated by spaces or commas")],
        },
        {
            "name": "add-filter",
            "description": "Only post publications mentioning one of these words",
            "options": [string_option("names", "Words, separated by spaces or commas")],
        },
        {
            "name": "delete",
            "description": "Stop following a source or remove a filter",
            "options": [string_option("identifier", "Name or url of the source, or filter word")],
        },
        { "name": "cancel", "description": "Cancel the procedure in progress" },
        { "name": "list", "description": "List followed sources and filters" },
        { "name": "help", "description": "What this bot does and how to use it" },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_arguments() {
        assert_eq!(
            split_arguments(" https://a.example/rss,https://b.example/rss  c "),
            vec!["https://a.example/rss", "https://b.example/rss", "c"]
        );
        assert!(split_arguments(" , ").is_empty());
    }

    #[test]
    fn test_command_wire_format() {
        let command: Command =
            serde_json::from_str(r#"{"name":"add-filter","names":"cat dog"}"#).unwrap();
        assert_eq!(command, Command::AddFilter { names: "cat dog".to_string() });
        assert_eq!(serde_json::to_value(Command::Help).unwrap(), json!({ "name": "help" }));
    }

    #[test]
    fn test_schema_covers_every_command() {
        let names: Vec<String> = schema()
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap().to_string())
            .collect();
        for command in [
            Command::AddSource { urls: String::new() },
            Command::AddFilter { names: String::new() },
            Command::Delete { identifier: String::new() },
            Command::List,
            Command::Cancel,
            Command::Help,
        ] {
            assert!(names.contains(&command.name().to_string()));
        }
    }
}
