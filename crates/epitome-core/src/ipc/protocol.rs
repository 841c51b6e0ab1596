//! Request/response envelopes and method parameters
//!
//! JSON-RPC style: every request carries an id echoed by its response.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commands::Command;
use crate::feed::Source;
use crate::scheduler::LastRun;
use crate::session::{Interaction, SessionView};
use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Uuid, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Error response for a core error, keeping its category in the code
    pub fn from_error(id: Uuid, error: &Error) -> Self {
        match error {
            Error::Validation(m) => Self::error(id, ERR_VALIDATION, m.as_str()),
            Error::DuplicateExists(m) => Self::error(id, ERR_DUPLICATE, m.as_str()),
            Error::NotFound(m) => Self::error(id, ERR_NOT_FOUND, m.as_str()),
            Error::Conflict(m) => Self::error(id, ERR_CONFLICT, m.as_str()),
            other => Self::error(id, ERR_INTERNAL, other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Error codes
pub const ERR_PARSE: i32 = -32700;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_CONFLICT: i32 = -32001;
pub const ERR_NOT_FOUND: i32 = -32002;
pub const ERR_VALIDATION: i32 = -32003;
pub const ERR_DUPLICATE: i32 = -32004;

pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";

    pub const PIPELINE_RUN: &str = "pipeline.run";
    pub const SOURCE_LIST: &str = "source.list";

    pub const SESSION_COMMAND: &str = "session.command";
    pub const SESSION_INTERACTION: &str = "session.interaction";
    pub const SESSION_LIST: &str = "session.list";
}

// Parameter structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceListParams {
    #[serde(default)]
    pub destination_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommandParams {
    pub user_id: String,
    pub destination_id: String,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInteractionParams {
    pub user_id: String,
    pub session_id: Uuid,
    pub interaction: Interaction,
}

// Response structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub refresh_interval_secs: u64,
    pub last_run: Option<LastRun>,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceListResponse {
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new(methods::PING);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"ping\""));
    }

    #[test]
    fn test_error_codes_follow_error_kind() {
        let id = Uuid::new_v4();
        let resp = Response::from_error(id, &Error::Conflict("busy".to_string()));
        assert!(!resp.is_success());
        assert_eq!(resp.error.unwrap().code, ERR_CONFLICT);

        let resp = Response::from_error(id, &Error::Other("boom".to_string()));
        assert_eq!(resp.error.unwrap().code, ERR_INTERNAL);
    }

    #[test]
    fn test_command_params_wire_format() {
        let params: SessionCommandParams = serde_json::from_value(serde_json::json!({
            "user_id": "42",
            "destination_id": "chan",
            "command": { "name": "delete", "identifier": "rust" }
        }))
        .unwrap();
        assert_eq!(params.command, Command::Delete { identifier: "rust".to_string() });
    }
}
