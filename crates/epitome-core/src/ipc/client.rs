//! IPC client for connecting to the daemon

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

use super::protocol::*;
use crate::commands::Command;
use crate::feed::Source;
use crate::pipeline::RunReport;
use crate::session::{Interaction, SessionReply, SessionView};
use crate::{Error, Result};

/// Client for communicating with the daemon
#[derive(Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Check if daemon is running by sending a ping
    pub async fn ping(&self) -> Result<bool> {
        match self.call(methods::PING, serde_json::Value::Null).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let result = self.call(methods::STATUS, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Trigger a pipeline run and wait for its report
    pub async fn run_pipeline(&self) -> Result<RunReport> {
        let result = self.call(methods::PIPELINE_RUN, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_sources(&self, destination_id: Option<&str>) -> Result<Vec<Source>> {
        let params = serde_json::json!({ "destination_id": destination_id });
        let result = self.call(methods::SOURCE_LIST, params).await?;
        let response: SourceListResponse = serde_json::from_value(result)?;
        Ok(response.sources)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionView>> {
        let result = self.call(methods::SESSION_LIST, serde_json::Value::Null).await?;
        let response: SessionListResponse = serde_json::from_value(result)?;
        Ok(response.sessions)
    }

    /// Forward a slash command on behalf of a user
    pub async fn session_command(
        &self,
        user_id: &str,
        destination_id: &str,
        command: Command,
    ) -> Result<SessionReply> {
        let params = serde_json::to_value(SessionCommandParams {
            user_id: user_id.to_string(),
            destination_id: destination_id.to_string(),
            command,
        })?;
        let result = self.call(methods::SESSION_COMMAND, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Forward a button press or menu selection
    pub async fn session_interaction(
        &self,
        user_id: &str,
        session_id: Uuid,
        interaction: Interaction,
    ) -> Result<SessionReply> {
        let params = serde_json::to_value(SessionInteractionParams {
            user_id: user_id.to_string(),
            session_id,
            interaction,
        })?;
        let result = self.call(methods::SESSION_INTERACTION, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a request and receive a response
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Other(format!(
                "Failed to connect to daemon at {}: {}. Is the daemon running?",
                self.socket_path.display(),
                e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request = Request::new(method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        reader.read_line(&mut response_line).await?;

        let response: Response = serde_json::from_str(&response_line)?;

        if let Some(error) = response.error {
            return Err(match error.code {
                ERR_CONFLICT => Error::Conflict(error.message),
                ERR_NOT_FOUND => Error::NotFound(error.message),
                ERR_VALIDATION => Error::Validation(error.message),
                ERR_DUPLICATE => Error::DuplicateExists(error.message),
                code => Error::Other(format!("RPC error {}: {}", code, error.message)),
            });
        }

        response.result.ok_or_else(|| Error::Other("Empty response".to_string()))
    }
}

/// Check if daemon is reachable
pub async fn is_daemon_running(socket_path: &std::path::Path) -> bool {
    let client = DaemonClient::new(socket_path.to_path_buf());
    client.ping().await.unwrap_or(false)
}
