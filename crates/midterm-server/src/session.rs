//! The Session record a manager owns one of per live terminal.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use midterm_proto::session::ForegroundInfo;
use midterm_proto::state_dto::SessionSummary;
use midterm_proto::{SessionId, ShellKind};

use crate::host_link::HostLink;
use crate::scrollback::ScrollbackRing;

/// One live (or just-exited) terminal session.
///
/// Mutable fields are plain, not individually locked: every mutation goes
/// through a `SessionManager` method that holds the `DashMap` shard guard
/// for the duration of the update and never awaits anything while holding
/// it — none of these fields are ever read or written across an await
/// point.
pub struct Session {
    pub id: SessionId,
    pub pid: u32,
    pub shell_kind: ShellKind,
    pub created_at_ms: u64,
    pub cols: u16,
    pub rows: u16,
    pub user_name: Option<String>,
    pub manually_named: bool,
    pub terminal_title: Option<String>,
    pub foreground: ForegroundInfo,
    pub running: bool,
    pub exit_code: Option<i32>,
    pub current_directory: Option<String>,
    pub scrollback: Arc<ScrollbackRing>,
    pub link: Arc<HostLink>,
}

impl Session {
    pub fn new(link: Arc<HostLink>, shell_kind: ShellKind, cols: u16, rows: u16, scrollback_cap_bytes: usize) -> Self {
        Self {
            id: link.session_id,
            pid: link.pid,
            shell_kind,
            created_at_ms: now_ms(),
            cols,
            rows,
            user_name: None,
            manually_named: false,
            terminal_title: None,
            foreground: ForegroundInfo::default(),
            running: true,
            exit_code: None,
            current_directory: None,
            scrollback: Arc::new(ScrollbackRing::new(scrollback_cap_bytes)),
            link,
        }
    }

    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.user_name.clone(),
            terminal_title: self.terminal_title.clone(),
            shell_type: self.shell_kind,
            cols: self.cols,
            rows: self.rows,
            pid: self.pid,
            is_running: self.running,
            exit_code: self.exit_code,
            foreground_name: self.foreground.name.clone(),
            foreground_command_line: self.foreground.command_line.clone(),
            foreground_cwd: self.foreground.cwd.clone(),
            foreground_pid: self.foreground.pid,
            current_directory: self.current_directory.clone(),
            created_at: self.created_at_ms.to_string(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
