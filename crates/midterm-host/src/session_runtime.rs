//! Orchestrates one session's lifetime end to end: bind, open
//! the PTY, buffer early output until a client connects, then run the
//! steady-state command loop until `Shutdown` or the shell exits.

use std::collections::VecDeque;

use midterm_proto::host_wire::{HostMessage, InfoPayload};
use midterm_proto::{Error, ForegroundInfo, ShellKind};
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::config::HostConfig;
use crate::foreground;
use crate::protocol_io::{read_message, write_message};
use crate::pty_session::{PtyEvent, PtySession};

/// Early output is buffered up to this many bytes while waiting for the
/// server to connect.
const EARLY_BUFFER_CAP: usize = 256 * 1024;

/// Wait up to 2s for the shell to exit after closing the PTY master before
/// forcibly killing its process group.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub async fn run<S>(cfg: HostConfig, stream: S) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session_id = cfg.session_id;
    let shell_kind = ShellKind::from_program(&cfg.shell);
    let mut pty = PtySession::spawn(&cfg).await?;
    info!(session_id = %session_id, pid = pty.pid, "pty spawned");

    let mut early_buffer: VecDeque<u8> = VecDeque::new();
    let mut early_dropped = false;

    let (fg_tx, mut fg_rx) = tokio::sync::mpsc::unbounded_channel::<ForegroundInfo>();
    let fg_handle = pty.foreground_handle();
    tokio::spawn(foreground::run(fg_handle, fg_tx));

    // `read_exact` isn't cancel-safe across a `tokio::select!`'s repeated
    // polling, so the reader runs on its own task and hands complete
    // messages (or the terminal EOF/error) across a channel instead of
    // being raced directly inside the loop below.
    let (mut read_half, mut write_half) = split(stream);
    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel::<midterm_proto::Result<Option<HostMessage>>>(8);
    tokio::spawn(async move {
        loop {
            let msg = read_message(&mut read_half).await;
            let is_terminal = matches!(msg, Ok(None) | Err(_));
            if inbound_tx.send(msg).await.is_err() || is_terminal {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = inbound_rx.recv() => {
                match msg.unwrap_or(Ok(None))? {
                    None => {
                        info!(session_id = %session_id, "server disconnected, shutting down");
                        break;
                    }
                    Some(HostMessage::GetInfo) => {
                        let info = InfoPayload {
                            id: session_id.as_str().to_string(),
                            pid: pty.pid,
                            shell_kind,
                            is_running: true,
                            cols: cfg.cols,
                            rows: cfg.rows,
                        };
                        write_message(&mut write_half, &HostMessage::Info(info)).await?;
                    }
                    Some(HostMessage::Input(bytes)) => pty.write_input(bytes),
                    Some(HostMessage::Resize { cols, rows }) => {
                        if let Err(e) = pty.resize(cols, rows) {
                            warn!(session_id = %session_id, error = %e, "resize failed");
                        }
                    }
                    Some(HostMessage::GetBuffer) => {
                        let buf: Vec<u8> = early_buffer.iter().copied().collect();
                        write_message(&mut write_half, &HostMessage::Buffer(buf)).await?;
                    }
                    Some(HostMessage::Shutdown) => {
                        shutdown_pty(&mut pty).await;
                        write_message(&mut write_half, &HostMessage::Exited(0)).await.ok();
                        break;
                    }
                    Some(other) => {
                        return Err(Error::ProtocolViolation(format!(
                            "unexpected message from server: {other:?}"
                        ))
                        .into());
                    }
                }
            }
            event = pty.events.recv() => {
                match event {
                    Some(PtyEvent::Output(bytes)) => {
                        buffer_early_output(&mut early_buffer, &mut early_dropped, &bytes);
                        write_message(&mut write_half, &HostMessage::Output(bytes)).await?;
                    }
                    Some(PtyEvent::Exited(code)) => {
                        write_message(&mut write_half, &HostMessage::Exited(code)).await?;
                        break;
                    }
                    None => {
                        warn!(session_id = %session_id, "pty event channel closed unexpectedly");
                        write_message(&mut write_half, &HostMessage::Exited(-1)).await.ok();
                        break;
                    }
                }
            }
            Some(fg) = fg_rx.recv() => {
                write_message(&mut write_half, &HostMessage::ForegroundChange(fg)).await?;
            }
        }
    }

    Ok(())
}

fn buffer_early_output(buffer: &mut VecDeque<u8>, dropped: &mut bool, bytes: &[u8]) {
    buffer.extend(bytes.iter().copied());
    while buffer.len() > EARLY_BUFFER_CAP {
        buffer.pop_front();
        *dropped = true;
    }
}

async fn shutdown_pty(pty: &mut PtySession) {
    // Closing the master (SIGHUP on POSIX) is implicit once the PtySession's
    // master handle is dropped; here we just wait out the grace period for
    // the exit event before giving up.
    let wait = sleep(SHUTDOWN_GRACE);
    tokio::pin!(wait);
    tokio::select! {
        _ = &mut wait => {
            warn!("shell did not exit within shutdown grace period");
        }
        event = pty.events.recv() => {
            if let Some(PtyEvent::Exited(code)) = event {
                info!(code, "shell exited during graceful shutdown");
            }
        }
    }
}
