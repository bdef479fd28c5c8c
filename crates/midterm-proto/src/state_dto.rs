//! JSON DTOs carried on the State/Settings WebSocket and the REST surface.

use serde::{Deserialize, Serialize};

use crate::session::{ShellKind, SessionId};
use crate::settings::Settings;

/// One entry in the `sessions` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: Option<String>,
    pub terminal_title: Option<String>,
    pub shell_type: ShellKind,
    pub cols: u16,
    pub rows: u16,
    pub pid: u32,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    pub foreground_name: Option<String>,
    pub foreground_command_line: Option<String>,
    pub foreground_cwd: Option<String>,
    pub foreground_pid: Option<u32>,
    pub current_directory: Option<String>,
    pub created_at: String,
}

/// Advisory update-availability info, sourced from an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub available: bool,
    pub current_version: String,
    pub latest_version: Option<String>,
}

/// Server→client messages on `/ws/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Sessions { sessions: Vec<SessionSummary> },
    Update(UpdateInfo),
}

/// Server→client messages on `/ws/settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingsMessage {
    Settings(Settings),
}

/// `{ type: "command", id, action, payload }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `{ type: "response", id, success, data|error }`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: "response",
            id,
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(id: String, error: impl Into<String>) -> Self {
        Self {
            kind: "response",
            id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Payload of the `session.reorder` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderPayload {
    pub session_ids: Vec<SessionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_message_tag() {
        let msg = ServerMessage::Sessions { sessions: vec![] };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with("{\"type\":\"sessions\""));
    }

    #[test]
    fn command_response_omits_absent_fields() {
        let resp = CommandResponse::ok("1".into(), None);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("error"));
        assert!(!json.contains("data"));
    }

    #[test]
    fn command_request_defaults_payload() {
        let json = r#"{"id":"1","action":"session.reorder"}"#;
        let req: CommandRequest = serde_json::from_str(json).unwrap();
        assert!(req.payload.is_null());
    }
}
