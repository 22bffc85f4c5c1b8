//! Response chunker: serializes an `HttpResponse` and splits it into
//! MTU-sized frames for emission on the Response characteristic's notify
//! path, with backoff when the notification queue reports itself full.

use std::time::Duration;

use nettool_proto::{Frame, FrameFlags, http};

use crate::error::ProxyError;

/// Initial backoff delay when a notification is rejected as full.
pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
/// Backoff delay is doubled after each failed attempt, up to this cap.
pub(crate) const MAX_BACKOFF: Duration = Duration::from_millis(200);
/// Total time budget for emitting one response before it is abandoned.
pub(crate) const EMIT_BUDGET: Duration = Duration::from_secs(10);
/// Pacing delay between successful notifications, so a multi-frame response
/// doesn't saturate the link-layer connection interval back to back.
pub(crate) const INTER_CHUNK_PACE: Duration = Duration::from_millis(10);

/// Split a serialized response into the ordered sequence of frames that
/// should be notified for `correlation_id` under `att_mtu`.
///
/// A single-chunk response sets both FIRST and LAST on its only frame.
#[must_use]
pub fn frames_for_response(
    response: &nettool_proto::HttpResponse,
    correlation_id: [u8; 16],
    att_mtu: u16,
) -> Vec<Frame> {
    let wire = http::serialize_response(response);
    chunk_bytes(&wire, correlation_id, att_mtu)
}

fn chunk_bytes(wire: &[u8], correlation_id: [u8; 16], att_mtu: u16) -> Vec<Frame> {
    let budget = Frame::mtu_payload(att_mtu);
    if wire.is_empty() {
        return vec![Frame::new(correlation_id, FrameFlags::new(true, true), Vec::new())];
    }

    let chunks: Vec<&[u8]> = wire.chunks(budget).collect();
    let last = chunks.len() - 1;

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            Frame::new(correlation_id, FrameFlags::new(i == 0, i == last), Vec::from(*chunk))
        })
        .collect()
}

/// An abstraction over "send one frame via a characteristic notification",
/// isolated so the chunker's pacing/backoff logic can be tested without a
/// live BlueZ connection.
pub trait Notifier {
    /// The failure returned when the underlying notification queue is
    /// currently full and the frame was not accepted.
    type QueueFull;

    /// Attempt to notify `frame`. `Ok(())` means accepted; `Err` means the
    /// queue reported itself full and the caller should back off and
    /// retry.
    fn try_notify(&mut self, frame: &Frame) -> Result<(), Self::QueueFull>;
}

/// Emit every frame of `frames` through `notifier`, retrying with
/// exponential backoff on a full queue, sleeping `sleep_fn(duration)`
/// between retries and between successful emissions for pacing.
///
/// Returns `Ok(frame_count)` if the whole sequence was emitted within
/// [`EMIT_BUDGET`], or `Err` if the budget was exhausted, in which case
/// the response is abandoned per spec and the caller should log at ERROR.
pub async fn emit_with_backoff<N, S, Fut>(
    notifier: &mut N,
    frames: &[Frame],
    mut sleep_fn: S,
) -> Result<usize, ProxyError>
where
    N: Notifier,
    S: FnMut(Duration) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let deadline_budget = EMIT_BUDGET;
    let mut elapsed = Duration::ZERO;
    let last = frames.len().saturating_sub(1);

    for (i, frame) in frames.iter().enumerate() {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match notifier.try_notify(frame) {
                Ok(()) => break,
                Err(_queue_full) => {
                    if elapsed + backoff > deadline_budget {
                        return Err(ProxyError::Lifecycle(format!(
                            "notification queue exhausted backoff budget after {i} of {} frames",
                            frames.len()
                        )));
                    }
                    sleep_fn(backoff).await;
                    elapsed += backoff;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                },
            }
        }

        if i != last {
            sleep_fn(INTER_CHUNK_PACE).await;
        }
    }

    Ok(frames.len())
}

#[cfg(test)]
mod tests {
    use nettool_proto::{HeaderList, HttpResponse};

    use super::*;

    fn sample_response(body_len: usize) -> HttpResponse {
        HttpResponse {
            version_minor: 1,
            status: 200,
            reason: "OK".to_string(),
            headers: HeaderList::new(),
            body: vec![b'x'; body_len],
        }
    }

    #[test]
    fn single_chunk_response_sets_both_flags() {
        let frames = frames_for_response(&sample_response(5), [1u8; 16], u16::MAX);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].flags.is_first());
        assert!(frames[0].flags.is_last());
    }

    #[test]
    fn multi_chunk_response_has_exactly_one_first_and_last() {
        let frames = frames_for_response(&sample_response(4000), [2u8; 16], 100);
        assert!(frames.len() > 1);
        assert_eq!(frames.iter().filter(|f| f.flags.is_first()).count(), 1);
        assert_eq!(frames.iter().filter(|f| f.flags.is_last()).count(), 1);
        assert!(frames[0].flags.is_first());
        assert!(frames.last().unwrap().flags.is_last());
    }

    #[test]
    fn chunk_payloads_never_exceed_mtu_budget() {
        let frames = frames_for_response(&sample_response(10_000), [3u8; 16], 64);
        let budget = Frame::mtu_payload(64);
        assert!(frames.iter().all(|f| f.payload.len() <= budget));
    }

    #[test]
    fn reassembled_chunks_equal_original_wire_bytes() {
        let response = sample_response(3000);
        let wire = http::serialize_response(&response);
        let frames = frames_for_response(&response, [4u8; 16], 128);

        let reassembled: Vec<u8> = frames.iter().flat_map(|f| f.payload.to_vec()).collect();
        assert_eq!(reassembled, wire);
    }

    struct FlakyNotifier {
        fail_first_n: usize,
        sent: Vec<[u8; 16]>,
    }

    impl Notifier for FlakyNotifier {
        type QueueFull = ();

        fn try_notify(&mut self, frame: &Frame) -> Result<(), Self::QueueFull> {
            if self.fail_first_n > 0 {
                self.fail_first_n -= 1;
                return Err(());
            }
            self.sent.push(frame.id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn emit_retries_through_transient_queue_full() {
        let frames = frames_for_response(&sample_response(10), [5u8; 16], u16::MAX);
        let mut notifier = FlakyNotifier { fail_first_n: 2, sent: Vec::new() };

        let count = emit_with_backoff(&mut notifier, &frames, |_| async {}).await.unwrap();

        assert_eq!(count, frames.len());
        assert_eq!(notifier.sent.len(), frames.len());
    }

    #[tokio::test]
    async fn emit_abandons_after_budget_exhausted() {
        struct AlwaysFull;
        impl Notifier for AlwaysFull {
            type QueueFull = ();
            fn try_notify(&mut self, _frame: &Frame) -> Result<(), Self::QueueFull> {
                Err(())
            }
        }

        let frames = frames_for_response(&sample_response(10), [6u8; 16], u16::MAX);
        let mut notifier = AlwaysFull;

        // A no-op sleep would loop forever backing off without ever
        // exceeding the budget's wall-clock time, so advance a virtual
        // elapsed counter instead by treating each "sleep" as consuming
        // its duration against the budget tracked inside emit_with_backoff.
        let result = emit_with_backoff(&mut notifier, &frames, |_| async {}).await;
        assert!(result.is_err());
    }
}
