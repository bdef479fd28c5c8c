//! CLI configuration for the `midterm-server` process.
//!
//! Mirrors `midterm-host`'s `config.rs` in shape (a `clap` CLI struct plus a
//! validated runtime config struct), scaled up to the handful of knobs the
//! session manager, scrollback, and settings cache need.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "midterm-server", about = "Web-facing terminal multiplexer server")]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, default_value = "127.0.0.1:7890")]
    pub bind_address: String,

    /// Path to the `midterm-host` binary to spawn per session.
    #[arg(long, default_value = "midterm-host")]
    pub host_binary: String,

    /// Scrollback cap in bytes, per session.
    #[arg(long, default_value_t = crate::scrollback::DEFAULT_CAP_BYTES)]
    pub scrollback_cap_bytes: usize,

    /// Path to a JSON file persisting user settings across restarts.
    #[arg(long)]
    pub settings_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub host_binary: String,
    pub scrollback_cap_bytes: usize,
    pub settings_path: Option<String>,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Self {
        Self {
            bind_address: cli.bind_address,
            host_binary: cli.host_binary,
            scrollback_cap_bytes: cli.scrollback_cap_bytes,
            settings_path: cli.settings_path,
        }
    }
}
