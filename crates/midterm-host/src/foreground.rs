//! Periodic foreground-process sampling.
//!
//! The session's "foreground process" is whatever currently owns the PTY's
//! controlling process group. We poll at a cadence between 250ms and 2s and
//! only emit when the observed pid (or its metadata) changes, so idle
//! sessions don't spam the mux with redundant `ForegroundChange` frames.

use std::time::Duration;

use midterm_proto::ForegroundInfo;
use sysinfo::{Pid, System};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::pty_session::ForegroundHandle;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Runs until the sender side is dropped. Spawned as its own task
/// (`tokio::spawn`) alongside the PTY reader/writer/waiter threads.
pub async fn run(handle: ForegroundHandle, tx: mpsc::UnboundedSender<ForegroundInfo>) {
    let mut last: Option<ForegroundInfo> = None;
    let mut sys = System::new();
    loop {
        sleep(SAMPLE_INTERVAL).await;
        let current = sample(&handle, &mut sys);
        if Some(&current) != last.as_ref() {
            if tx.send(current.clone()).is_err() {
                return;
            }
            last = Some(current);
        }
    }
}

#[cfg(unix)]
fn sample(handle: &ForegroundHandle, sys: &mut System) -> ForegroundInfo {
    let Some(pid) = handle.foreground_pid() else {
        return ForegroundInfo::default();
    };
    sys.refresh_process(Pid::from_u32(pid));
    match sys.process(Pid::from_u32(pid)) {
        Some(proc) => ForegroundInfo {
            pid: Some(pid),
            name: Some(proc.name().to_string()),
            command_line: Some(proc.cmd().join(" ")),
            cwd: proc.cwd().map(|p| p.display().to_string()),
        },
        None => ForegroundInfo {
            pid: Some(pid),
            name: None,
            command_line: None,
            cwd: None,
        },
    }
}

/// `portable-pty` has no process-group-leader accessor on Windows, and
/// ConPTY doesn't expose one directly either; we report no foreground
/// process there rather than guess (see DESIGN.md open question).
#[cfg(not(unix))]
fn sample(_handle: &ForegroundHandle, _sys: &mut System) -> ForegroundInfo {
    ForegroundInfo::default()
}
