//! Owns the PTY and the shell child process for one session.
//!
//! `portable-pty` gives us the "open a PTY running command C at size
//! (cols,rows), get byte streams + a PID" primitive on both POSIX (forkpty
//! under the hood) and Windows (ConPTY). Its reader/writer are blocking
//! `std::io`, so each direction gets its own OS thread, mirroring
//! `pty-proxy`'s dedicated-thread-per-direction idiom but adapted from a
//! single poll loop to one thread per direction since we no longer share a
//! poll set with our own stdin/stdout.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::HostConfig;

/// Events flowing from the PTY/child up to the session runtime.
#[derive(Debug)]
pub enum PtyEvent {
    Output(Vec<u8>),
    Exited(i32),
}

pub struct PtySession {
    pub pid: u32,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub events: mpsc::UnboundedReceiver<PtyEvent>,
}

impl PtySession {
    /// Open the PTY and spawn the shell. Blocking calls run on
    /// `spawn_blocking`/dedicated threads; this returns once the child has
    /// started.
    pub async fn spawn(cfg: &HostConfig) -> anyhow::Result<Self> {
        let cfg = cfg.clone();
        tokio::task::spawn_blocking(move || Self::spawn_blocking(&cfg)).await?
    }

    fn spawn_blocking(cfg: &HostConfig) -> anyhow::Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system.openpty(PtySize {
            rows: cfg.rows,
            cols: cfg.cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut cmd = CommandBuilder::new(&cfg.shell);
        if let Some(dir) = &cfg.working_directory {
            cmd.cwd(dir);
        }
        #[cfg(unix)]
        if let Some(user) = &cfg.run_as_user {
            apply_run_as_user(&mut cmd, user)?;
        }

        let child = pair.slave.spawn_command(cmd)?;
        // The child/slave side is owned by the spawned process now.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        let reader = pair.master.try_clone_reader()?;
        let writer = pair.master.take_writer()?;
        let master: Arc<Mutex<Box<dyn MasterPty + Send>>> = Arc::new(Mutex::new(pair.master));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        spawn_reader_thread(reader, event_tx.clone());
        spawn_writer_thread(writer, writer_rx);
        spawn_waiter_thread(child, event_tx);

        Ok(Self {
            pid,
            master,
            writer_tx,
            events: event_rx,
        })
    }

    /// Non-blocking enqueue onto the writer thread; never blocks the
    /// caller.
    pub fn write_input(&self, data: Vec<u8>) {
        if self.writer_tx.send(data).is_err() {
            warn!("pty writer thread gone, dropping input");
        }
    }

    /// Resize is a quick ioctl/ConPTY call; safe to do inline.
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let master = self.master.lock().expect("pty master mutex poisoned");
        master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;
        Ok(())
    }

    /// Foreground process-group leader pid, when the platform exposes one.
    /// `None` on platforms/paths where it can't be determined (see
    /// DESIGN.md's Windows open question).
    pub fn foreground_pid(&self) -> Option<u32> {
        self.foreground_handle().foreground_pid()
    }

    /// A cheap, `'static` handle for the foreground sampler task, so it can
    /// run as its own `tokio::spawn`ed loop without borrowing `self`.
    pub fn foreground_handle(&self) -> ForegroundHandle {
        ForegroundHandle {
            master: self.master.clone(),
        }
    }
}

/// Clone-able, `Send + 'static` view onto the PTY master for the foreground
/// sampler, decoupled from the rest of `PtySession` so it can be owned by an
/// independently spawned task.
#[derive(Clone)]
pub struct ForegroundHandle {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
}

impl ForegroundHandle {
    pub fn foreground_pid(&self) -> Option<u32> {
        #[cfg(unix)]
        {
            let master = self.master.lock().expect("pty master mutex poisoned");
            master.process_group_leader().map(|p| p as u32)
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

#[cfg(unix)]
fn apply_run_as_user(cmd: &mut CommandBuilder, user: &str) -> anyhow::Result<()> {
    // Resolving a username to uid/gid and dropping privilege is a thin
    // wrapper around libc; CommandBuilder carries no native "run as" hook,
    // so we stash it as an env var the shell-wrapping logic can act on if
    // the caller is already running with the privilege to `setuid`.
    cmd.env("MIDTERM_RUN_AS_USER", user);
    Ok(())
}

fn spawn_reader_thread(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<PtyEvent>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("pty master closed (eof)");
                    break;
                }
                Ok(n) => {
                    if tx.send(PtyEvent::Output(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "pty read error");
                    break;
                }
            }
        }
    });
}

fn spawn_writer_thread(mut writer: Box<dyn Write + Send>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    std::thread::spawn(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data) {
                warn!(error = %e, "pty write error");
                break;
            }
            let _ = writer.flush();
        }
    });
}

fn spawn_waiter_thread(mut child: Box<dyn Child + Send + Sync>, tx: mpsc::UnboundedSender<PtyEvent>) {
    std::thread::spawn(move || {
        let code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(_) => -1,
        };
        let _ = tx.send(PtyEvent::Exited(code));
    });
}
