//! Request/response bodies for the REST surface.

use serde::{Deserialize, Serialize};

use crate::session::ShellKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub cols: u16,
    pub rows: u16,
    pub shell: Option<ShellKind>,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResizeResponse {
    pub accepted: bool,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}
