//! Reassembly table: the mapping from correlation ID to an in-progress
//! request body, plus the admission state machine frames are run through.
//!
//! All mutations happen under a single mutex, with hold times bounded by a
//! single O(payload length) copy, matching the spec's requirement that the
//! BLE write handler never suspends between admitting a frame and
//! returning.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use nettool_proto::{CorrelationId, Frame};
use tracing::warn;

/// Per-entry payload size cap (1 MiB).
pub const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Maximum number of concurrently in-flight correlation IDs.
pub const MAX_CONCURRENT_REQUESTS: usize = 256;

/// Entries idle longer than this are considered abandoned and collected by
/// the periodic sweep.
pub const ENTRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of admitting a single frame into the reassembly table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The frame was appended; the request is not yet complete.
    Buffered,
    /// The LAST frame was admitted; the entry has been removed and its
    /// full payload is returned to the caller for dispatch to a worker.
    Complete(Vec<u8>),
    /// The entry would have exceeded [`MAX_REQUEST_SIZE`]; it has been
    /// removed.
    Oversize,
    /// A continuation frame (FIRST=0) arrived for an ID with no open
    /// entry.
    UnknownId,
    /// A FIRST frame arrived while the table was already at
    /// [`MAX_CONCURRENT_REQUESTS`] capacity.
    Overload,
}

/// Bookkeeping kept for each correlation ID mid-assembly.
#[derive(Debug, Clone)]
pub struct PendingRequest<I> {
    /// Accumulated payload so far.
    pub buffer: Vec<u8>,
    /// When this entry was created, for GC purposes.
    pub created_at: I,
    /// When this entry last received a frame, for GC purposes.
    pub last_seen: I,
    /// The path of the central that opened this entry, used both for
    /// stats attribution and for cancellation on disconnect.
    pub owner: String,
}

struct Inner<I> {
    entries: HashMap<CorrelationId, PendingRequest<I>>,
}

/// Thread-safe table mapping correlation IDs to in-progress request
/// bodies.
///
/// Generic over the instant type `I` so it can run under either a real
/// clock or a deterministic test clock.
pub struct ReassemblyTable<I> {
    inner: Mutex<Inner<I>>,
}

impl<I: Copy + Ord + std::ops::Sub<Output = Duration>> ReassemblyTable<I> {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { entries: HashMap::new() }) }
    }

    /// Admit a single decoded frame, owned by `device_path`, observed at
    /// `now`.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn admit(&self, frame: &Frame, device_path: &str, now: I) -> AdmitOutcome {
        let mut inner = self.inner.lock().expect("reassembly table mutex poisoned");

        if frame.flags.is_first() {
            if inner.entries.len() >= MAX_CONCURRENT_REQUESTS && !inner.entries.contains_key(&frame.id) {
                return AdmitOutcome::Overload;
            }
            if inner.entries.remove(&frame.id).is_some() {
                warn!(
                    correlation_id = %hex_id(&frame.id),
                    "duplicate FIRST frame: evicting in-flight entry"
                );
            }
            inner.entries.insert(
                frame.id,
                PendingRequest {
                    buffer: frame.payload.to_vec(),
                    created_at: now,
                    last_seen: now,
                    owner: device_path.to_string(),
                },
            );
        } else {
            let Some(entry) = inner.entries.get_mut(&frame.id) else {
                return AdmitOutcome::UnknownId;
            };
            entry.buffer.extend_from_slice(&frame.payload);
            entry.last_seen = now;
        }

        let Some(entry) = inner.entries.get(&frame.id) else {
            return AdmitOutcome::UnknownId;
        };

        if entry.buffer.len() > MAX_REQUEST_SIZE {
            inner.entries.remove(&frame.id);
            return AdmitOutcome::Oversize;
        }

        if frame.flags.is_last() {
            let entry = inner.entries.remove(&frame.id).expect("entry present by construction");
            return AdmitOutcome::Complete(entry.buffer);
        }

        AdmitOutcome::Buffered
    }

    /// Remove every entry owned by `device_path`, returning how many were
    /// dropped. Called on central disconnect.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn remove_owned_by(&self, device_path: &str) -> usize {
        let mut inner = self.inner.lock().expect("reassembly table mutex poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.owner != device_path);
        before - inner.entries.len()
    }

    /// Remove entries whose `last_seen` is older than [`ENTRY_TIMEOUT`]
    /// relative to `now`, returning the number collected.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn sweep(&self, now: I) -> usize {
        let mut inner = self.inner.lock().expect("reassembly table mutex poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| now - entry.last_seen < ENTRY_TIMEOUT);
        before - inner.entries.len()
    }

    /// Number of entries currently in flight.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("reassembly table mutex poisoned").entries.len()
    }

    /// Whether the table has no in-flight entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: Copy + Ord + std::ops::Sub<Output = Duration>> Default for ReassemblyTable<I> {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_id(id: &CorrelationId) -> String {
    id.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::Bytes;
    use nettool_proto::FrameFlags;

    use super::*;

    fn frame(id: CorrelationId, first: bool, last: bool, payload: &[u8]) -> Frame {
        Frame::new(id, FrameFlags::new(first, last), Bytes::copy_from_slice(payload))
    }

    #[test]
    fn single_chunk_completes_immediately() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let id = [1u8; 16];
        let now = Instant::now();

        let outcome = table.admit(&frame(id, true, true, b"hello"), "/dev/a", now);
        assert_eq!(outcome, AdmitOutcome::Complete(b"hello".to_vec()));
        assert!(table.is_empty());
    }

    #[test]
    fn multi_chunk_buffers_then_completes_in_order() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let id = [2u8; 16];
        let now = Instant::now();

        assert_eq!(table.admit(&frame(id, true, false, b"ab"), "/dev/a", now), AdmitOutcome::Buffered);
        assert_eq!(table.admit(&frame(id, false, false, b"cd"), "/dev/a", now), AdmitOutcome::Buffered);
        assert_eq!(
            table.admit(&frame(id, false, true, b"ef"), "/dev/a", now),
            AdmitOutcome::Complete(b"abcdef".to_vec())
        );
    }

    #[test]
    fn continuation_for_unknown_id_is_rejected() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let outcome = table.admit(&frame([9u8; 16], false, true, b"x"), "/dev/a", Instant::now());
        assert_eq!(outcome, AdmitOutcome::UnknownId);
    }

    #[test]
    fn oversize_entry_is_dropped() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let id = [3u8; 16];
        let now = Instant::now();

        table.admit(&frame(id, true, false, &vec![0u8; MAX_REQUEST_SIZE]), "/dev/a", now);
        let outcome = table.admit(&frame(id, false, true, b"overflow"), "/dev/a", now);

        assert_eq!(outcome, AdmitOutcome::Oversize);
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_first_evicts_old_entry() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let id = [4u8; 16];
        let now = Instant::now();

        table.admit(&frame(id, true, false, b"stale"), "/dev/a", now);
        let outcome = table.admit(&frame(id, true, true, b"fresh"), "/dev/a", now);

        assert_eq!(outcome, AdmitOutcome::Complete(b"fresh".to_vec()));
    }

    #[test]
    fn overload_rejects_further_firsts_at_capacity() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let now = Instant::now();

        for i in 0..MAX_CONCURRENT_REQUESTS {
            let mut id = [0u8; 16];
            id[0..8].copy_from_slice(&(i as u64).to_be_bytes());
            assert_eq!(table.admit(&frame(id, true, false, b"x"), "/dev/a", now), AdmitOutcome::Buffered);
        }

        let extra_id = [0xffu8; 16];
        assert_eq!(table.admit(&frame(extra_id, true, false, b"x"), "/dev/a", now), AdmitOutcome::Overload);
    }

    #[test]
    fn remove_owned_by_drops_only_that_centrals_entries() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let now = Instant::now();

        table.admit(&frame([1u8; 16], true, false, b"a"), "/dev/a", now);
        table.admit(&frame([2u8; 16], true, false, b"b"), "/dev/b", now);

        let removed = table.remove_owned_by("/dev/a");
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_collects_only_stale_entries() {
        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let start = Instant::now();

        table.admit(&frame([1u8; 16], true, false, b"a"), "/dev/a", start);

        let still_fresh = start + Duration::from_secs(10);
        assert_eq!(table.sweep(still_fresh), 0);

        let stale = start + Duration::from_secs(31);
        assert_eq!(table.sweep(stale), 1);
        assert!(table.is_empty());
    }
}
