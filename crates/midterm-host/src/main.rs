//! `midterm-host`: one process per terminal session.
//!
//! Invoked by the server's Host IPC Link with a session id and PTY
//! parameters. Binds its IPC address first, spawns the shell, then waits
//! for the server to connect before producing any output it might miss.

mod config;
mod foreground;
mod protocol_io;
mod pty_session;
mod session_runtime;
mod transport;

use clap::Parser;
use config::{ipc_address, Cli, HostConfig};
use tracing::{error, info};
use transport::HostListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = HostConfig::from_cli(cli)?;
    let address = ipc_address(&cfg.session_id);

    info!(session_id = %cfg.session_id, %address, "binding host ipc listener");
    let listener = HostListener::bind(&address)?;

    // The address is qualified by this process's own pid, which the server
    // can't predict before spawning us; hand it back on stdout as a single
    // line so the server's Host IPC Link knows where to dial.
    println!("{address}");
    use std::io::Write;
    std::io::stdout().flush().ok();

    #[cfg(unix)]
    {
        let stream = listener.accept().await?;
        info!(session_id = %cfg.session_id, "server connected");
        if let Err(e) = session_runtime::run(cfg, stream).await {
            error!(error = %e, "session runtime exited with error");
            return Err(e);
        }
    }
    #[cfg(windows)]
    {
        // NamedPipeServer's `accept` borrows the listener rather than
        // handing over an owned stream; wiring it into `session_runtime::run`
        // needs the owned-pipe-per-connection rework tracked in DESIGN.md.
        let _ = listener;
        anyhow::bail!("windows host runtime wiring not yet implemented");
    }

    Ok(())
}
