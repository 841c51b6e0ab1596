//! Chat platform seam
//!
//! The core only ever talks to a [`Gateway`]. [`HttpGateway`] speaks the
//! Discord REST API; [`LogGateway`] writes messages to the log and is used
//! when no bot token is configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::render::{ButtonStyle, Component, RenderedMessage};
use crate::{Error, Result};

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Deliver one message segment. Fails with [`Error::Delivery`].
    async fn send_message(&self, destination_id: &str, message: &RenderedMessage) -> Result<()>;

    /// Publish the slash-command schema
    async fn register_commands(&self, schema: &Value) -> Result<()>;
}

/// Build the configured gateway: HTTP when a bot token is set, log-only otherwise
pub fn from_config(config: &AppConfig) -> Result<std::sync::Arc<dyn Gateway>> {
    match &config.gateway.bot_token {
        Some(token) if !token.trim().is_empty() => Ok(std::sync::Arc::new(HttpGateway::new(
            &config.gateway.api_base_url,
            token,
            config.gateway.application_id.clone(),
            config.sync.request_timeout_secs,
        )?)),
        _ => {
            tracing::warn!("No bot token configured, messages will only be logged");
            Ok(std::sync::Arc::new(LogGateway))
        }
    }
}

/// Discord REST gateway
pub struct HttpGateway {
    client: Client,
    api_base_url: String,
    application_id: Option<String>,
}

impl HttpGateway {
    pub fn new(
        api_base_url: &str,
        bot_token: &str,
        application_id: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bot {}", bot_token.trim()))
            .map_err(|e| Error::Config(format!("Invalid bot token: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            application_id,
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Delivery(format!("{} failed with HTTP {}: {}", what, status, body)))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send_message(&self, destination_id: &str, message: &RenderedMessage) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base_url, destination_id);

        let response = self
            .client
            .post(&url)
            .json(&message_payload(message))
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("Request to {} failed: {}", destination_id, e)))?;

        Self::check(response, "Message delivery").await
    }

    async fn register_commands(&self, schema: &Value) -> Result<()> {
        let application_id = self.application_id.as_deref().ok_or_else(|| {
            Error::Config("gateway.application_id is required to register commands".to_string())
        })?;
        let url = format!("{}/applications/{}/commands", self.api_base_url, application_id);

        let response = self
            .client
            .put(&url)
            .json(schema)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("Command registration failed: {}", e)))?;

        Self::check(response, "Command registration").await?;
        tracing::info!("Registered slash commands");
        Ok(())
    }
}

/// Discord message JSON: content plus one action row of components
fn message_payload(message: &RenderedMessage) -> Value {
    let mut payload = json!({ "content": message.content });
    if message.components.is_empty() {
        return payload;
    }

    let components: Vec<Value> = message
        .components
        .iter()
        .map(|component| match component {
            Component::Button {
                custom_id,
                label,
                style,
            } => json!({
                "type": 2,
                "style": button_style(*style),
                "label": label,
                "custom_id": custom_id,
            }),
            Component::SelectMenu {
                custom_id,
                placeholder,
                options,
            } => json!({
                "type": 3,
                "custom_id": custom_id,
                "placeholder": placeholder,
                "options": options
                    .iter()
                    .map(|o| json!({ "label": o.label, "value": o.value }))
                    .collect::<Vec<_>>(),
            }),
        })
        .collect();

    payload["components"] = json!([{ "type": 1, "components": components }]);
    payload
}

fn button_style(style: ButtonStyle) -> u8 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

/// Dry-run gateway writing every message to the log
pub struct LogGateway;

#[async_trait]
impl Gateway for LogGateway {
    async fn send_message(&self, destination_id: &str, message: &RenderedMessage) -> Result<()> {
        tracing::info!(
            destination_id,
            components = message.components.len(),
            "\n{}",
            message.content
        );
        Ok(())
    }

    async fn register_commands(&self, schema: &Value) -> Result<()> {
        tracing::info!("Command schema:\n{}", serde_json::to_string_pretty(schema)?);
        Ok(())
    }
}
