//! Scrollback Ring: a bounded, sequence-numbered byte log that
//! survives client reconnects and seeds new clients with the current
//! screen.
//!
//! Mirrors the shape of `AppState`'s scrollback fields
//! (`scrollback_frames: Mutex<Vec<Vec<u8>>>` + a running byte total) but
//! pulled out into its own type with sequence numbers, since several
//! sessions each need one and the mux channel needs `since(seq)` to decide
//! what a reconnecting client missed.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default cap on total held bytes per session.
pub const DEFAULT_CAP_BYTES: usize = 1024 * 1024;

struct Frame {
    seq: u64,
    bytes: Vec<u8>,
    #[allow(dead_code)] // diagnostics only
    created_at_ms: u64,
}

struct Inner {
    frames: VecDeque<Frame>,
    total_bytes: usize,
    next_seq: u64,
    bytes_dropped: u64,
}

/// A single session's bounded output log. Cheap, non-awaitable operations
/// guarded by a plain `std::sync::Mutex`.
pub struct ScrollbackRing {
    cap_bytes: usize,
    inner: Mutex<Inner>,
}

impl ScrollbackRing {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            cap_bytes,
            inner: Mutex::new(Inner {
                frames: VecDeque::new(),
                total_bytes: 0,
                next_seq: 1,
                bytes_dropped: 0,
            }),
        }
    }

    /// Appends a frame, evicting the oldest whole frames (never splitting
    /// one) until back under the cap. Returns the assigned sequence number.
    pub fn append(&self, bytes: Vec<u8>) -> u64 {
        let mut inner = self.inner.lock().expect("scrollback mutex poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.total_bytes += bytes.len();
        inner.frames.push_back(Frame {
            seq,
            bytes,
            created_at_ms: now_ms(),
        });
        // Never evict the single remaining frame, even if it alone exceeds
        // the cap — an oversized append is still admitted whole rather than
        // split.
        while inner.total_bytes > self.cap_bytes && inner.frames.len() > 1 {
            let Some(evicted) = inner.frames.pop_front() else {
                break;
            };
            inner.total_bytes -= evicted.bytes.len();
            inner.bytes_dropped += evicted.bytes.len() as u64;
        }
        seq
    }

    /// Concatenation of all currently held frames, plus the newest
    /// sequence number (0 if empty).
    pub fn snapshot(&self) -> (Vec<u8>, u64) {
        let inner = self.inner.lock().expect("scrollback mutex poisoned");
        let mut out = Vec::new();
        for frame in &inner.frames {
            out.extend_from_slice(&frame.bytes);
        }
        let head_seq = inner.frames.back().map(|f| f.seq).unwrap_or(0);
        (out, head_seq)
    }

    /// Frames with `seq` greater than the given cursor. `missed` is true
    /// when the cursor is older than the oldest held frame, meaning the
    /// caller must treat the stream as resynchronized.
    pub fn since(&self, seq: u64) -> (Vec<Vec<u8>>, u64, bool) {
        let inner = self.inner.lock().expect("scrollback mutex poisoned");
        let oldest = inner.frames.front().map(|f| f.seq);
        // A gap of at least one frame between what the caller last saw and
        // what is now the oldest held frame means something in between was
        // dropped out from under them.
        let missed = match oldest {
            Some(oldest) => seq < oldest.saturating_sub(1),
            None => false,
        };
        let frames: Vec<Vec<u8>> = inner
            .frames
            .iter()
            .filter(|f| f.seq > seq)
            .map(|f| f.bytes.clone())
            .collect();
        let new_head = inner.frames.back().map(|f| f.seq).unwrap_or(seq);
        (frames, new_head, missed)
    }

    pub fn bytes_dropped(&self) -> u64 {
        self.inner.lock().expect("scrollback mutex poisoned").bytes_dropped
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_increasing_sequence_numbers() {
        let ring = ScrollbackRing::new(DEFAULT_CAP_BYTES);
        assert_eq!(ring.append(b"a".to_vec()), 1);
        assert_eq!(ring.append(b"b".to_vec()), 2);
    }

    #[test]
    fn snapshot_concatenates_held_frames() {
        let ring = ScrollbackRing::new(DEFAULT_CAP_BYTES);
        ring.append(b"hello ".to_vec());
        ring.append(b"world".to_vec());
        let (bytes, head_seq) = ring.snapshot();
        assert_eq!(bytes, b"hello world");
        assert_eq!(head_seq, 2);
    }

    #[test]
    fn since_returns_only_newer_frames() {
        let ring = ScrollbackRing::new(DEFAULT_CAP_BYTES);
        ring.append(b"1".to_vec());
        ring.append(b"2".to_vec());
        ring.append(b"3".to_vec());
        let (frames, head, missed) = ring.since(1);
        assert_eq!(frames, vec![b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(head, 3);
        assert!(!missed);
    }

    #[test]
    fn cap_evicts_whole_oldest_frames_and_tracks_drops() {
        let ring = ScrollbackRing::new(10);
        ring.append(vec![0u8; 6]);
        ring.append(vec![0u8; 6]); // now 12 bytes held, over the 10 cap
        assert!(ring.bytes_dropped() >= 6);
        let (bytes, _) = ring.snapshot();
        assert!(bytes.len() <= 10);
    }

    #[test]
    fn oversized_single_append_is_admitted_and_reports_missed() {
        let ring = ScrollbackRing::new(1024 * 1024);
        let first = ring.append(vec![1u8; 1024]);
        ring.append(vec![2u8; 1024]);
        // A 1.5 MiB append alone exceeds the 1 MiB cap; both prior small
        // frames are evicted but the oversized frame itself is admitted.
        ring.append(vec![3u8; 1024 * 1024 + 512 * 1024]);
        let (frames, _, missed) = ring.since(first);
        assert!(missed);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 1024 * 1024 + 512 * 1024);
    }
}
