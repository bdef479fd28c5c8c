//! CLI configuration for a `midterm-host` process.
//!
//! One process per session; the server spawns it with the
//! session id, shell, initial size, working directory, and (optionally) a
//! user to run as.

use clap::Parser;
use midterm_proto::session::{validate_dimensions, SessionId};

#[derive(Debug, Parser)]
#[command(name = "midterm-host", about = "PTY host process for one midterm session")]
pub struct Cli {
    /// 8 lowercase hex character session id assigned by the server.
    #[arg(long)]
    pub session_id: String,

    /// Shell executable to spawn. Defaults to $SHELL on Unix, cmd.exe on Windows.
    #[arg(long)]
    pub shell: Option<String>,

    /// Initial column count.
    #[arg(long, default_value_t = 80)]
    pub cols: u16,

    /// Initial row count.
    #[arg(long, default_value_t = 24)]
    pub rows: u16,

    /// Working directory for the spawned shell.
    #[arg(long)]
    pub working_directory: Option<String>,

    /// Unix username to run the shell as (requires privilege to drop to).
    #[arg(long)]
    pub run_as_user: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub session_id: SessionId,
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    pub working_directory: Option<String>,
    pub run_as_user: Option<String>,
}

impl HostConfig {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        validate_dimensions(cli.cols, cli.rows)?;
        let session_id = SessionId::parse(&cli.session_id)?;
        let shell = cli.shell.unwrap_or_else(default_shell);
        Ok(Self {
            session_id,
            shell,
            cols: cli.cols,
            rows: cli.rows,
            working_directory: cli.working_directory,
            run_as_user: cli.run_as_user,
        })
    }
}

#[cfg(unix)]
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(windows)]
fn default_shell() -> String {
    "cmd.exe".to_string()
}

/// The well-known IPC address for this session.
#[cfg(unix)]
pub fn ipc_address(session_id: &SessionId) -> String {
    let tmp = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    format!(
        "{}/midterm-host-{}-{}.sock",
        tmp.trim_end_matches('/'),
        session_id,
        std::process::id()
    )
}

#[cfg(windows)]
pub fn ipc_address(session_id: &SessionId) -> String {
    format!(r"\\.\pipe\midterm-host-{}-{}", session_id, std::process::id())
}
