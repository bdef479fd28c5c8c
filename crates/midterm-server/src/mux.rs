//! Mux Channel: one per connected client, carrying output for
//! every session over a single binary WebSocket.
//!
//! The reader task / writer task / bounded outbound queue split here keeps
//! I/O and manager callbacks off each other's critical path, using
//! `midterm_proto::mux_wire::MuxFrame` for the wire format (itself grounded
//! on `sshx-server`'s protocol style).

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::{SinkExt, StreamExt};
use midterm_proto::mux_wire::{MuxFrame, PROTOCOL_VERSION};
use midterm_proto::SessionId;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::AppState;

const OUTBOUND_QUEUE_CAPACITY: usize = 1000;
const COMPRESSION_THRESHOLD: usize = 1024;
const BACKGROUND_FLUSH_BYTES: usize = 2 * 1024;
const BACKGROUND_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_TICK: Duration = Duration::from_millis(250);
const SEND_STALL_TIMEOUT: Duration = Duration::from_secs(5);

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws/mux", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state))
}

/// A bounded FIFO of outbound messages, with the overflow rule built into
/// `enqueue` itself: dropping everything pending and replacing it with a
/// single `Resync` is cheaper to do at the point of overflow than to detect
/// after the fact.
struct OutboundQueue {
    items: Mutex<std::collections::VecDeque<Message>>,
    notify: Notify,
    closed: AtomicBool,
}

enum Enqueued {
    Ok,
    Overflowed,
}

impl OutboundQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(std::collections::VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn enqueue(&self, msg: Message) -> Enqueued {
        let mut items = self.items.lock().expect("outbound queue mutex poisoned");
        if items.len() >= OUTBOUND_QUEUE_CAPACITY {
            items.clear();
            items.push_back(Message::Binary(MuxFrame::Resync.encode(None).into()));
            drop(items);
            self.notify.notify_one();
            return Enqueued::Overflowed;
        }
        items.push_back(msg);
        drop(items);
        self.notify.notify_one();
        Enqueued::Ok
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    async fn recv(&self) -> Option<Message> {
        loop {
            {
                let mut items = self.items.lock().expect("outbound queue mutex poisoned");
                if let Some(msg) = items.pop_front() {
                    return Some(msg);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

struct PendingBuffer {
    bytes: Vec<u8>,
    started_at: Instant,
}

/// Per-client Mux state: delivery classification, pending background
/// buffers, send cursors, and data-loss bookkeeping.
struct ConnectionState {
    active: Option<SessionId>,
    pending: HashMap<SessionId, PendingBuffer>,
    cursors: HashMap<SessionId, u64>,
    known_dropped: HashMap<SessionId, u64>,
    known_sessions: HashSet<SessionId>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            active: None,
            pending: HashMap::new(),
            cursors: HashMap::new(),
            known_dropped: HashMap::new(),
            known_sessions: HashSet::new(),
        }
    }
}

/// Fan-in events from per-session watch subscriptions into one channel the
/// main connection loop selects on, alongside inbound frames and timers.
enum FanEvent {
    Output(SessionId),
    Foreground(SessionId),
}

async fn run(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let queue = OutboundQueue::new();

    let writer_queue = Arc::clone(&queue);
    let writer = tokio::spawn(async move {
        while let Some(msg) = writer_queue.recv().await {
            match tokio::time::timeout(SEND_STALL_TIMEOUT, sink.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(error = %e, "mux send failed, closing");
                    break;
                }
                Err(_) => {
                    warn!("mux send stalled past 5s, closing");
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut full_client_id = [0u8; 32];
    for b in full_client_id.iter_mut() {
        *b = rand::random();
    }
    queue.enqueue(Message::Binary(
        MuxFrame::Init {
            protocol_version: PROTOCOL_VERSION,
            full_client_id,
        }
        .encode(None)
        .into(),
    ));

    let (fan_tx, mut fan_rx) = mpsc::unbounded_channel::<FanEvent>();
    let mut conn = ConnectionState::new();

    for id in state.manager.session_ids() {
        conn.known_sessions.insert(id);
        spawn_forwarders(&state, id, fan_tx.clone());
        send_snapshot(&state, &queue, &mut conn, id);
    }

    let mut sessions_changed = state.hub.subscribe_sessions_changed();
    let mut flush_tick = tokio::time::interval(FLUSH_TICK);

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        if !handle_inbound(&state, &queue, &mut conn, &bytes) {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        warn!("mux channel rejects text frames, closing");
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "mux read error, closing");
                        break;
                    }
                }
            }
            event = fan_rx.recv() => {
                match event {
                    Some(FanEvent::Output(id)) => handle_output_event(&state, &queue, &mut conn, id),
                    Some(FanEvent::Foreground(id)) => handle_foreground_event(&state, &queue, id),
                    None => {}
                }
            }
            _ = sessions_changed.changed() => {
                let current = state.manager.session_ids();
                for id in current {
                    if conn.known_sessions.insert(id) {
                        spawn_forwarders(&state, id, fan_tx.clone());
                        send_snapshot(&state, &queue, &mut conn, id);
                    }
                }
            }
            _ = flush_tick.tick() => {
                let stale: Vec<SessionId> = conn
                    .pending
                    .iter()
                    .filter(|(_, buf)| buf.started_at.elapsed() >= BACKGROUND_FLUSH_INTERVAL)
                    .map(|(id, _)| *id)
                    .collect();
                for id in stale {
                    flush_pending(&state, &queue, &mut conn, id);
                }
            }
        }
    }

    queue.close();
    let _ = writer.await;
}

fn spawn_forwarders(state: &AppState, id: SessionId, fan_tx: mpsc::UnboundedSender<FanEvent>) {
    let hub = Arc::clone(&state.hub);
    let mut rx = hub.subscribe_output_changed(id);
    let tx = fan_tx.clone();
    tokio::spawn(async move {
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            if tx.send(FanEvent::Output(id)).is_err() {
                break;
            }
        }
    });

    let mut fg_rx = hub.subscribe_foreground_changed(id);
    tokio::spawn(async move {
        loop {
            if fg_rx.changed().await.is_err() {
                break;
            }
            if fan_tx.send(FanEvent::Foreground(id)).is_err() {
                break;
            }
        }
    });
}

fn handle_inbound(state: &AppState, queue: &Arc<OutboundQueue>, conn: &mut ConnectionState, bytes: &[u8]) -> bool {
    let (frame, session_id) = match MuxFrame::decode(bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "malformed mux frame, closing");
            return false;
        }
    };
    match frame {
        MuxFrame::Input { data } => {
            if let Some(id) = session_id {
                if state.manager.is_running(id) {
                    if let Some(link) = state.manager.link(id) {
                        link.write_input(data);
                    }
                }
            }
        }
        MuxFrame::Resize { cols, rows } => {
            if let Some(id) = session_id {
                let _ = state.manager.resize(id, cols, rows);
            }
        }
        MuxFrame::BufferRequest => {
            if let Some(id) = session_id {
                send_snapshot(state, queue, conn, id);
            }
        }
        MuxFrame::ActiveSessionHint => {
            conn.active = session_id;
            if let Some(id) = session_id {
                flush_pending(state, queue, conn, id);
            }
        }
        _ => {
            // Every other frame type is server→client only; a client sending
            // one is a protocol violation but not worth tearing down over.
            warn!("ignoring unexpected client-to-server mux frame");
        }
    }
    true
}

fn handle_output_event(state: &AppState, queue: &Arc<OutboundQueue>, conn: &mut ConnectionState, id: SessionId) {
    let Some(ring) = state.manager.scrollback(id) else { return };
    let cursor = *conn.cursors.get(&id).unwrap_or(&0);
    let (frames, new_head, missed) = ring.since(cursor);
    if missed {
        emit_data_loss(queue, conn, id, ring.bytes_dropped());
    }
    let Some((cols, rows)) = state.manager.dimensions(id) else { return };
    let is_active = conn.active == Some(id);
    for frame in frames {
        if is_active {
            queue.enqueue(active_output_message(id, cols, rows, frame));
        } else {
            append_pending(conn, id, &frame);
        }
    }
    conn.cursors.insert(id, new_head);
    if !is_active {
        if let Some(buf) = conn.pending.get(&id) {
            if buf.bytes.len() >= BACKGROUND_FLUSH_BYTES {
                flush_pending(state, queue, conn, id);
            }
        }
    }
}

fn handle_foreground_event(state: &AppState, queue: &Arc<OutboundQueue>, id: SessionId) {
    let Some(info) = state.manager.foreground(id) else { return };
    queue.enqueue(Message::Binary(MuxFrame::ForegroundChange(info).encode(Some(id)).into()));
}

fn append_pending(conn: &mut ConnectionState, id: SessionId, bytes: &[u8]) {
    let entry = conn.pending.entry(id).or_insert_with(|| PendingBuffer {
        bytes: Vec::new(),
        started_at: Instant::now(),
    });
    entry.bytes.extend_from_slice(bytes);
}

fn flush_pending(state: &AppState, queue: &Arc<OutboundQueue>, conn: &mut ConnectionState, id: SessionId) {
    let Some(buf) = conn.pending.remove(&id) else { return };
    if buf.bytes.is_empty() {
        return;
    }
    let (cols, rows) = state.manager.dimensions(id).unwrap_or((80, 24));
    queue.enqueue(output_message(id, cols, rows, &buf.bytes));
}

fn emit_data_loss(queue: &Arc<OutboundQueue>, conn: &mut ConnectionState, id: SessionId, total_dropped: u64) {
    let known = conn.known_dropped.entry(id).or_insert(0);
    let delta = total_dropped.saturating_sub(*known);
    *known = total_dropped;
    if delta == 0 {
        return;
    }
    queue.enqueue(Message::Binary(
        MuxFrame::DataLoss {
            dropped_bytes: delta.min(u32::MAX as u64) as u32,
        }
        .encode(Some(id))
        .into(),
    ));
}

fn send_snapshot(state: &AppState, queue: &Arc<OutboundQueue>, conn: &mut ConnectionState, id: SessionId) {
    let Some(ring) = state.manager.scrollback(id) else { return };
    let (bytes, head_seq) = ring.snapshot();
    let (cols, rows) = state.manager.dimensions(id).unwrap_or((80, 24));
    queue.enqueue(output_message(id, cols, rows, &bytes));
    conn.cursors.insert(id, head_seq);
    conn.known_dropped.insert(id, ring.bytes_dropped());
}

/// Active-session output goes out immediately, uncompressed, one message
/// per manager-append — never routed through the compression threshold
/// that the background/snapshot paths use.
fn active_output_message(id: SessionId, cols: u16, rows: u16, data: Vec<u8>) -> Message {
    Message::Binary(MuxFrame::Output { cols, rows, data }.encode(Some(id)).into())
}

/// `Output` if under the compression threshold, else `CompressedOutput`.
/// Applied uniformly to every path that sends a whole buffer at once:
/// initial snapshot, `BufferRequest`, and background flush.
fn output_message(id: SessionId, cols: u16, rows: u16, data: &[u8]) -> Message {
    if data.len() < COMPRESSION_THRESHOLD {
        return Message::Binary(MuxFrame::Output { cols, rows, data: data.to_vec() }.encode(Some(id)).into());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(data).is_err() {
        return Message::Binary(MuxFrame::Output { cols, rows, data: data.to_vec() }.encode(Some(id)).into());
    }
    let gzip_bytes = match encoder.finish() {
        Ok(bytes) => bytes,
        Err(_) => return Message::Binary(MuxFrame::Output { cols, rows, data: data.to_vec() }.encode(Some(id)).into()),
    };
    Message::Binary(
        MuxFrame::CompressedOutput {
            cols,
            rows,
            uncompressed_len: data.len() as u32,
            gzip_bytes,
        }
        .encode(Some(id))
        .into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(hex: &str) -> SessionId {
        SessionId::parse(hex).unwrap()
    }

    #[test]
    fn outbound_queue_overflow_drops_everything_pending_and_leaves_only_a_resync() {
        let queue = OutboundQueue::new();
        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            let outcome = queue.enqueue(Message::Binary(vec![i as u8].into()));
            assert!(matches!(outcome, Enqueued::Ok));
        }
        let outcome = queue.enqueue(Message::Binary(vec![0xff].into()));
        assert!(matches!(outcome, Enqueued::Overflowed));

        let items = queue.items.lock().unwrap();
        assert_eq!(items.len(), 1);
        let Message::Binary(bytes) = items.front().unwrap().clone() else {
            panic!("expected a binary frame");
        };
        let (frame, _) = MuxFrame::decode(&bytes).unwrap();
        assert!(matches!(frame, MuxFrame::Resync));
    }

    #[tokio::test]
    async fn outbound_queue_close_unblocks_a_pending_recv_with_none() {
        let queue = OutboundQueue::new();
        queue.close();
        assert!(queue.recv().await.is_none());
    }

    #[test]
    fn output_message_stays_uncompressed_under_the_threshold() {
        let sid = id("00000001");
        let data = vec![b'x'; COMPRESSION_THRESHOLD - 1];
        let Message::Binary(bytes) = output_message(sid, 80, 24, &data) else {
            panic!("expected a binary frame");
        };
        let (frame, decoded_id) = MuxFrame::decode(&bytes).unwrap();
        assert_eq!(decoded_id, Some(sid));
        match frame {
            MuxFrame::Output { data: d, cols, rows } => {
                assert_eq!(d, data);
                assert_eq!((cols, rows), (80, 24));
            }
            other => panic!("expected Output, got {other:?}"),
        }
    }

    #[test]
    fn output_message_compresses_at_and_above_the_threshold() {
        let sid = id("00000002");
        let data = vec![b'x'; COMPRESSION_THRESHOLD];
        let Message::Binary(bytes) = output_message(sid, 80, 24, &data) else {
            panic!("expected a binary frame");
        };
        let (frame, _) = MuxFrame::decode(&bytes).unwrap();
        match frame {
            MuxFrame::CompressedOutput { uncompressed_len, .. } => {
                assert_eq!(uncompressed_len as usize, data.len());
            }
            other => panic!("expected CompressedOutput, got {other:?}"),
        }
    }

    #[test]
    fn active_output_message_is_always_uncompressed_regardless_of_size() {
        let sid = id("00000005");
        let data = vec![b'x'; COMPRESSION_THRESHOLD * 4];
        let Message::Binary(bytes) = active_output_message(sid, 80, 24, data.clone()) else {
            panic!("expected a binary frame");
        };
        let (frame, decoded_id) = MuxFrame::decode(&bytes).unwrap();
        assert_eq!(decoded_id, Some(sid));
        match frame {
            MuxFrame::Output { data: d, .. } => assert_eq!(d, data),
            other => panic!("expected Output, got {other:?}"),
        }
    }

    #[test]
    fn append_pending_accumulates_bytes_across_calls() {
        let mut conn = ConnectionState::new();
        let sid = id("00000003");
        append_pending(&mut conn, sid, b"hello ");
        append_pending(&mut conn, sid, b"world");
        assert_eq!(conn.pending.get(&sid).unwrap().bytes, b"hello world");
    }

    #[test]
    fn emit_data_loss_sends_only_the_delta_and_skips_a_zero_delta() {
        let queue = OutboundQueue::new();
        let mut conn = ConnectionState::new();
        let sid = id("00000004");

        emit_data_loss(&queue, &mut conn, sid, 100);
        {
            let items = queue.items.lock().unwrap();
            assert_eq!(items.len(), 1);
        }

        emit_data_loss(&queue, &mut conn, sid, 100);
        {
            let items = queue.items.lock().unwrap();
            assert_eq!(items.len(), 1, "unchanged total should not enqueue another frame");
        }

        emit_data_loss(&queue, &mut conn, sid, 150);
        let items = queue.items.lock().unwrap();
        assert_eq!(items.len(), 2);
        let Message::Binary(bytes) = items.back().unwrap().clone() else {
            panic!("expected a binary frame");
        };
        let (frame, decoded_id) = MuxFrame::decode(&bytes).unwrap();
        assert_eq!(decoded_id, Some(sid));
        match frame {
            MuxFrame::DataLoss { dropped_bytes } => assert_eq!(dropped_bytes, 50),
            other => panic!("expected DataLoss, got {other:?}"),
        }
    }
}
