use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between ingestion runs (0 disables the scheduler)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// HTTP timeout for a single feed request
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Optional HTTP/SOCKS proxy used for feed fetching
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Maximum number of feeds fetched at the same time within one run
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Deliver the existing items of a feed when it is first subscribed
    #[serde(default)]
    pub deliver_backlog: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_timeout(),
            proxy_url: None,
            fetch_concurrency: default_fetch_concurrency(),
            deliver_backlog: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a session waits for a selection or confirmation
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Chat platform REST endpoint
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Bot token; without it messages are only logged
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Application id used to register slash commands
    #[serde(default)]
    pub application_id: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            bot_token: None,
            application_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Maximum characters per outgoing message
    #[serde(default = "default_message_budget")]
    pub message_budget: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            message_budget: default_message_budget(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("epitome")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh_interval() -> u64 {
    3600 // hourly
}

fn default_timeout() -> u64 {
    30
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_session_timeout() -> u64 {
    60
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_message_budget() -> usize {
    crate::render::MESSAGE_BUDGET
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file or return defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self) -> crate::Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Always ~/.config/epitome/config.toml
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("epitome")
            .join("config.toml")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("epitome.db")
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("epitome.sock")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [sync]
            refresh_interval_secs = 600

            [gateway]
            bot_token = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.refresh_interval_secs, 600);
        assert_eq!(config.sync.fetch_concurrency, 4);
        assert_eq!(config.session.timeout_secs, 60);
        assert_eq!(config.render.message_budget, 2000);
        assert_eq!(config.gateway.bot_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::from_toml("sync = 3").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
