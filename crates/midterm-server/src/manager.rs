//! Session Manager: the process-wide singleton owning every
//! live session.
//!
//! Grounded on `relay-server/src/state.rs`'s `AppState`/`DashMap` session
//! registry, generalized with an explicit order vector and reorder support.
//! Every mutating method here takes the `DashMap` shard guard (or the order
//! mutex) only for the duration of the in-memory update — none of them
//! `.await` while holding either lock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use midterm_proto::session::{validate_dimensions, validate_name};
use midterm_proto::state_dto::SessionSummary;
use midterm_proto::{Error, Result, SessionId, ShellKind};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::host_link::{HostLink, LinkEvent, ShutdownReason};
use crate::hub::BroadcastHub;
use crate::session::Session;

const ID_GENERATION_ATTEMPTS: u32 = 32;
/// Grace period between an exit being broadcast and the entry disappearing
/// from the table. Zero removes it on the next tick, relying on clients
/// having already observed the exited `sessions-changed` broadcast.
const EXIT_REMOVAL_GRACE: Duration = Duration::from_secs(0);

pub struct SessionManager {
    sessions: DashMap<SessionId, Session>,
    order: Mutex<Vec<SessionId>>,
    hub: Arc<BroadcastHub>,
    host_binary: String,
    scrollback_cap_bytes: usize,
}

impl SessionManager {
    pub fn new(hub: Arc<BroadcastHub>, cfg: &ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            order: Mutex::new(Vec::new()),
            hub,
            host_binary: cfg.host_binary.clone(),
            scrollback_cap_bytes: cfg.scrollback_cap_bytes,
        })
    }

    /// Create a new session: allocate an id (retrying on collision), start
    /// its Host IPC Link, and on success register it and publish
    /// `sessions-changed`.
    pub async fn create(
        self: &Arc<Self>,
        cols: u16,
        rows: u16,
        shell: Option<ShellKind>,
        working_directory: Option<String>,
    ) -> Result<SessionSummary> {
        validate_dimensions(cols, rows)?;

        let mut id = SessionId::generate(rand::random());
        let mut attempts = 0;
        while self.sessions.contains_key(&id) {
            attempts += 1;
            if attempts >= ID_GENERATION_ATTEMPTS {
                return Err(Error::BackendUnavailable(
                    "could not allocate a unique session id".into(),
                ));
            }
            id = SessionId::generate(rand::random());
        }

        let shell_program = shell.map(|kind| kind.default_program().to_string());
        let outcome = HostLink::start(id, cols, rows, shell_program, working_directory.clone(), &self.host_binary).await?;

        let shell_kind = shell.unwrap_or(outcome.info.shell_kind);
        let link = Arc::new(outcome.link);
        let mut session = Session::new(link, shell_kind, outcome.info.cols, outcome.info.rows, self.scrollback_cap_bytes);
        session.current_directory = working_directory;
        let summary = session.to_summary();

        self.sessions.insert(id, session);
        self.order.lock().expect("order mutex poisoned").push(id);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.drive_link_events(id, outcome.events).await;
        });

        info!(session_id = %id, "session created");
        self.hub.publish_sessions_changed();
        Ok(summary)
    }

    /// Consumes link events for one session until the link reports
    /// termination. Runs for the session's whole lifetime.
    async fn drive_link_events(self: Arc<Self>, id: SessionId, mut events: tokio::sync::mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Output(bytes) => self.on_link_output(id, bytes),
                LinkEvent::ForegroundChanged(info) => self.on_link_foreground_change(id, info),
                LinkEvent::Exited(code) => {
                    self.on_link_exit(id, code);
                    break;
                }
            }
        }
    }

    fn on_link_output(&self, id: SessionId, bytes: Vec<u8>) {
        let Some(session) = self.sessions.get(&id) else { return };
        let head_seq = session.scrollback.append(bytes);
        self.hub.publish_output_changed(id, head_seq);
    }

    fn on_link_foreground_change(&self, id: SessionId, info: midterm_proto::ForegroundInfo) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.foreground = info;
        } else {
            return;
        }
        self.hub.publish_foreground_changed(id);
    }

    fn on_link_exit(self: &Arc<Self>, id: SessionId, code: i32) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.running = false;
            session.exit_code = Some(code);
        } else {
            return;
        }
        info!(session_id = %id, exit_code = code, "session exited");
        self.hub.publish_sessions_changed();

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if !EXIT_REMOVAL_GRACE.is_zero() {
                tokio::time::sleep(EXIT_REMOVAL_GRACE).await;
            }
            manager.remove_exited(id);
        });
    }

    /// Removes an exited session's entry once its grace period has elapsed.
    /// A no-op if the client already called `delete()` in the meantime.
    fn remove_exited(&self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            self.order.lock().expect("order mutex poisoned").retain(|sid| *sid != id);
            self.hub.remove_session(id);
            info!(session_id = %id, "exited session removed after grace period");
            self.hub.publish_sessions_changed();
        }
    }

    /// Snapshot of session metadata in manager order.
    pub fn list(&self) -> Vec<SessionSummary> {
        let order = self.order.lock().expect("order mutex poisoned").clone();
        order
            .into_iter()
            .filter_map(|id| self.sessions.get(&id).map(|s| s.to_summary()))
            .collect()
    }

    /// Forward a resize to the link; only mutate the session's recorded
    /// `cols`/`rows` if the session is known and running. The link's resize
    /// is a coalesced, best-effort enqueue with no separate wire-level ack,
    /// so "update on ack" collapses to "update once the enqueue succeeds".
    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<()> {
        validate_dimensions(cols, rows)?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        if !session.running {
            return Err(Error::SessionNotRunning(id.to_string()));
        }
        session.link.resize(cols, rows);
        session.cols = cols;
        session.rows = rows;
        Ok(())
    }

    pub fn rename(&self, id: SessionId, name: String) -> Result<()> {
        let name = validate_name(&name)?;
        {
            let mut session = self
                .sessions
                .get_mut(&id)
                .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
            session.user_name = Some(name);
            session.manually_named = true;
        }
        self.hub.publish_sessions_changed();
        Ok(())
    }

    /// `link.shutdown(ClientRequested)`, remove the entry, publish
    /// `sessions-changed`.
    pub async fn delete(&self, id: SessionId) -> Result<()> {
        let link = {
            let session = self
                .sessions
                .get(&id)
                .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
            Arc::clone(&session.link)
        };
        link.shutdown(ShutdownReason::ClientRequested).await;
        self.sessions.remove(&id);
        self.order.lock().expect("order mutex poisoned").retain(|sid| *sid != id);
        self.hub.remove_session(id);
        info!(session_id = %id, "session deleted");
        self.hub.publish_sessions_changed();
        Ok(())
    }

    /// `session.reorder`: the payload's id set must equal
    /// the current session id set exactly, or the order is left untouched.
    pub fn reorder(&self, new_order: Vec<SessionId>) -> Result<()> {
        let mut order = self.order.lock().expect("order mutex poisoned");
        let mut current_sorted = order.clone();
        let mut new_sorted = new_order.clone();
        current_sorted.sort_by_key(|id| id.to_string());
        new_sorted.sort_by_key(|id| id.to_string());
        if current_sorted != new_sorted {
            return Err(Error::InvalidArgument(
                "reorder payload must name exactly the current set of sessions".into(),
            ));
        }
        *order = new_order;
        drop(order);
        self.hub.publish_sessions_changed();
        Ok(())
    }

    pub fn scrollback(&self, id: SessionId) -> Option<Arc<crate::scrollback::ScrollbackRing>> {
        self.sessions.get(&id).map(|s| Arc::clone(&s.scrollback))
    }

    pub fn foreground(&self, id: SessionId) -> Option<midterm_proto::ForegroundInfo> {
        self.sessions.get(&id).map(|s| s.foreground.clone())
    }

    pub fn link(&self, id: SessionId) -> Option<Arc<HostLink>> {
        self.sessions.get(&id).map(|s| Arc::clone(&s.link))
    }

    pub fn is_running(&self, id: SessionId) -> bool {
        self.sessions.get(&id).map(|s| s.running).unwrap_or(false)
    }

    pub fn dimensions(&self, id: SessionId) -> Option<(u16, u16)> {
        self.sessions.get(&id).map(|s| (s.cols, s.rows))
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.order.lock().expect("order mutex poisoned").clone()
    }

    pub fn buffer_text(&self, id: SessionId) -> Result<String> {
        let session = self
            .sessions
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let (bytes, _) = session.scrollback.snapshot();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Shuts down every live session's Host IPC Link, for graceful server
    /// exit.
    pub async fn shutdown_all(&self) {
        let ids = self.session_ids();
        for id in ids {
            let Some(link) = self.link(id) else { continue };
            link.shutdown(ShutdownReason::ServerShutdown).await;
        }
        warn!("all host links shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<SessionManager> {
        let cfg = ServerConfig {
            bind_address: "127.0.0.1:0".into(),
            host_binary: "midterm-host".into(),
            scrollback_cap_bytes: crate::scrollback::DEFAULT_CAP_BYTES,
            settings_path: None,
        };
        SessionManager::new(Arc::new(BroadcastHub::new()), &cfg)
    }

    fn id(hex: &str) -> SessionId {
        SessionId::parse(hex).unwrap()
    }

    #[test]
    fn reorder_rejects_a_payload_missing_a_known_session() {
        let manager = manager();
        *manager.order.lock().unwrap() = vec![id("aaaaaaaa"), id("bbbbbbbb")];
        let err = manager.reorder(vec![id("aaaaaaaa")]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(manager.session_ids(), vec![id("aaaaaaaa"), id("bbbbbbbb")]);
    }

    #[test]
    fn reorder_accepts_a_permutation_of_the_current_set() {
        let manager = manager();
        *manager.order.lock().unwrap() = vec![id("aaaaaaaa"), id("bbbbbbbb")];
        manager.reorder(vec![id("bbbbbbbb"), id("aaaaaaaa")]).unwrap();
        assert_eq!(manager.session_ids(), vec![id("bbbbbbbb"), id("aaaaaaaa")]);
    }

    #[test]
    fn unknown_session_operations_report_not_found() {
        let manager = manager();
        assert!(matches!(manager.resize(id("ffffffff"), 80, 24), Err(Error::SessionNotFound(_))));
        assert!(matches!(manager.rename(id("ffffffff"), "x".into()), Err(Error::SessionNotFound(_))));
        assert_eq!(manager.dimensions(id("ffffffff")), None);
    }
}
