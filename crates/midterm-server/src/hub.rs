//! Broadcast Hub: three topics, coalescing single-slot mailbox
//! semantics.
//!
//! `tokio::sync::watch` is exactly a coalescing single-slot mailbox: a
//! sender's `send` always overwrites the current value, and every receiver
//! independently observes "has it changed since I last looked", never a
//! queue of intermediate values. `sessions-changed` and `settings-changed`
//! are process-wide; `foreground-changed` is per-session, so the hub keeps
//! one watch channel per session id, created lazily and cleaned up on
//! session delete.

use dashmap::DashMap;
use midterm_proto::SessionId;
use tokio::sync::watch;

/// A topic with no payload: listeners just learn "something happened,
/// re-read the manager". The token carried is a plain generation counter.
pub struct BroadcastHub {
    sessions_changed: watch::Sender<u64>,
    settings_changed: watch::Sender<u64>,
    foreground_changed: DashMap<SessionId, watch::Sender<u64>>,
    /// Per-session "new scrollback head" topic. Unlike the other two topics
    /// the token carried *is* the payload (the new head sequence number),
    /// since every subscriber would otherwise have to re-query the manager
    /// just to learn the value that changed.
    output_changed: DashMap<SessionId, watch::Sender<u64>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            sessions_changed: watch::Sender::new(0),
            settings_changed: watch::Sender::new(0),
            foreground_changed: DashMap::new(),
            output_changed: DashMap::new(),
        }
    }

    pub fn subscribe_sessions_changed(&self) -> watch::Receiver<u64> {
        self.sessions_changed.subscribe()
    }

    pub fn publish_sessions_changed(&self) {
        self.sessions_changed.send_modify(|token| *token = token.wrapping_add(1));
    }

    pub fn subscribe_settings_changed(&self) -> watch::Receiver<u64> {
        self.settings_changed.subscribe()
    }

    pub fn publish_settings_changed(&self) {
        self.settings_changed.send_modify(|token| *token = token.wrapping_add(1));
    }

    pub fn subscribe_foreground_changed(&self, session_id: SessionId) -> watch::Receiver<u64> {
        self.foreground_changed
            .entry(session_id)
            .or_insert_with(|| watch::Sender::new(0))
            .subscribe()
    }

    pub fn publish_foreground_changed(&self, session_id: SessionId) {
        if let Some(tx) = self.foreground_changed.get(&session_id) {
            tx.send_modify(|token| *token = token.wrapping_add(1));
        }
    }

    pub fn subscribe_output_changed(&self, session_id: SessionId) -> watch::Receiver<u64> {
        self.output_changed
            .entry(session_id)
            .or_insert_with(|| watch::Sender::new(0))
            .subscribe()
    }

    /// `head_seq` is the scrollback's new head sequence number, not a counter.
    pub fn publish_output_changed(&self, session_id: SessionId, head_seq: u64) {
        if let Some(tx) = self.output_changed.get(&session_id) {
            let _ = tx.send(head_seq);
        }
    }

    /// Drops the per-session topics once a session is deleted, so the hub
    /// doesn't grow without bound across a long server lifetime.
    pub fn remove_session(&self, session_id: SessionId) {
        self.foreground_changed.remove(&session_id);
        self.output_changed.remove(&session_id);
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_changed_coalesces_into_one_observable_change() {
        let hub = BroadcastHub::new();
        let mut rx = hub.subscribe_sessions_changed();
        let before = *rx.borrow();
        hub.publish_sessions_changed();
        hub.publish_sessions_changed();
        hub.publish_sessions_changed();
        assert!(rx.has_changed().unwrap());
        let after = *rx.borrow_and_update();
        assert_ne!(before, after);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn foreground_changed_is_scoped_per_session() {
        let hub = BroadcastHub::new();
        let a = SessionId::parse("aaaaaaaa").unwrap();
        let b = SessionId::parse("bbbbbbbb").unwrap();
        let mut rx_a = hub.subscribe_foreground_changed(a);
        let mut rx_b = hub.subscribe_foreground_changed(b);
        hub.publish_foreground_changed(a);
        assert!(rx_a.has_changed().unwrap());
        assert!(!rx_b.has_changed().unwrap());
    }

    #[test]
    fn output_changed_token_carries_the_new_head_seq() {
        let hub = BroadcastHub::new();
        let id = SessionId::parse("cccccccc").unwrap();
        let mut rx = hub.subscribe_output_changed(id);
        hub.publish_output_changed(id, 42);
        assert_eq!(*rx.borrow_and_update(), 42);
    }

    #[test]
    fn remove_session_drops_its_per_session_topics() {
        let hub = BroadcastHub::new();
        let id = SessionId::parse("dddddddd").unwrap();
        let _rx = hub.subscribe_output_changed(id);
        hub.remove_session(id);
        assert!(hub.output_changed.get(&id).is_none());
        assert!(hub.foreground_changed.get(&id).is_none());
    }
}
