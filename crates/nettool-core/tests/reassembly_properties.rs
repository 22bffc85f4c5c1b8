//! Property tests for the reassembly table's concatenation and GC
//! invariants.

use std::time::{Duration, Instant};

use bytes::Bytes;
use nettool_core::reassembly::{AdmitOutcome, ReassemblyTable, ENTRY_TIMEOUT};
use nettool_proto::{CorrelationId, Frame, FrameFlags};
use proptest::prelude::*;

fn arbitrary_chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..12)
}

fn frames_for(id: CorrelationId, chunks: &[Vec<u8>]) -> Vec<Frame> {
    let last_index = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            Frame::new(id, FrameFlags::new(i == 0, i == last_index), Bytes::from(chunk.clone()))
        })
        .collect()
}

proptest! {
    #[test]
    fn concatenation_equals_ordered_payloads(chunks in arbitrary_chunks()) {
        let total: usize = chunks.iter().map(Vec::len).sum();
        prop_assume!(total <= nettool_core::reassembly::MAX_REQUEST_SIZE);

        let table: ReassemblyTable<Instant> = ReassemblyTable::new();
        let id = [5u8; 16];
        let now = Instant::now();

        let expected: Vec<u8> = chunks.iter().flatten().copied().collect();
        let frames = frames_for(id, &chunks);

        let mut last_outcome = None;
        for frame in &frames {
            last_outcome = Some(table.admit(frame, "/dev/central", now));
        }

        prop_assert_eq!(last_outcome, Some(AdmitOutcome::Complete(expected)));
    }
}

#[test]
fn no_entry_survives_a_sweep_past_the_timeout() {
    let table: ReassemblyTable<Instant> = ReassemblyTable::new();
    let start = Instant::now();
    let id = [1u8; 16];

    table.admit(
        &Frame::new(id, FrameFlags::new(true, false), Bytes::from_static(b"partial")),
        "/dev/central",
        start,
    );

    assert_eq!(table.len(), 1);

    let past_timeout = start + ENTRY_TIMEOUT + Duration::from_millis(1);
    let collected = table.sweep(past_timeout);

    assert_eq!(collected, 1);
    assert!(table.is_empty());
}

#[test]
fn concurrent_ids_do_not_interfere() {
    let table: ReassemblyTable<Instant> = ReassemblyTable::new();
    let now = Instant::now();

    let id_a = [0xAAu8; 16];
    let id_b = [0xBBu8; 16];

    table.admit(&Frame::new(id_a, FrameFlags::new(true, false), Bytes::from_static(b"a1")), "/dev/a", now);
    table.admit(&Frame::new(id_b, FrameFlags::new(true, false), Bytes::from_static(b"b1")), "/dev/b", now);

    let done_a = table.admit(&Frame::new(id_a, FrameFlags::new(false, true), Bytes::from_static(b"a2")), "/dev/a", now);
    let done_b = table.admit(&Frame::new(id_b, FrameFlags::new(false, true), Bytes::from_static(b"b2")), "/dev/b", now);

    assert_eq!(done_a, AdmitOutcome::Complete(b"a1a2".to_vec()));
    assert_eq!(done_b, AdmitOutcome::Complete(b"b1b2".to_vec()));
}
