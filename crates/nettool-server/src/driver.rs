//! Proxy driver: the pure-logic admission state machine for the Request
//! characteristic, reassembly-to-worker handoff, and connection
//! bookkeeping.
//!
//! Mirrors the teacher's driver/executor split: this type never touches
//! D-Bus, sockets, or a real clock (beyond what `Environment` gives it).
//! The executor in `lib.rs`/`gatt.rs` drives it with [`ProxyEvent`]s
//! produced by the bus integration and interprets the [`ProxyAction`]s it
//! returns. Keeping the admission logic here means the hard-to-test
//! concurrency invariants can be exercised without a running Bluetooth
//! stack or HTTP server.

use nettool_core::{
    env::Environment,
    reassembly::{AdmitOutcome, ReassemblyTable},
    stats::{ConnectionStats, SnapshotContext, StatusSnapshot},
};
use nettool_proto::{CorrelationId, Frame, FrameError, HttpResponse};
use tokio_util::sync::CancellationToken;

use crate::{origin, registry::ConnectionRegistry};

/// Events fed into the driver by the executor.
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    /// A central connected.
    CentralConnected {
        /// Identifier for the central (see [`crate::gatt`] for how this is
        /// derived from `bluer`'s peer address).
        device_path: String,
    },
    /// A central disconnected.
    CentralDisconnected {
        /// Identifier for the central that disconnected.
        device_path: String,
    },
    /// Raw bytes were written to the Request characteristic by
    /// `device_path`. Decoding happens inside the driver so malformed
    /// frames are handled uniformly with everything else in §7's error
    /// table.
    RequestWrite {
        /// Identifier for the writing central.
        device_path: String,
        /// Raw GATT write value.
        bytes: Vec<u8>,
    },
    /// Periodic reassembly-table GC sweep tick.
    GcTick,
}

/// Actions the executor must carry out in response to an event.
#[derive(Debug)]
pub enum ProxyAction {
    /// A request finished reassembly; dispatch it to a worker that will
    /// parse it, forward it to the HTTP origin, and chunk the response
    /// back out.
    DispatchRequest {
        /// Correlation ID the response must be framed with.
        correlation_id: CorrelationId,
        /// The central that owns this request, for cancellation on
        /// disconnect.
        device_path: String,
        /// The fully reassembled request bytes.
        request: Vec<u8>,
    },
    /// A request failed admission in a way that still owes the central a
    /// framed HTTP response, without going through the origin client
    /// (currently only the OVERSIZE case).
    RespondSynthesized {
        /// Correlation ID the response must be framed with.
        correlation_id: CorrelationId,
        /// The central the response should be emitted to.
        device_path: String,
        /// The synthesized response body.
        response: HttpResponse,
    },
    /// A structured log line.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
}

/// Log severities produced by [`ProxyAction::Log`], mapped onto `tracing`
/// macros by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational message.
    Info,
    /// Warning: a recoverable protocol-layer error (§7).
    Warn,
    /// Error: an unrecoverable-but-non-fatal condition (§7).
    Error,
}

/// The proxy's Sans-IO orchestrator: reassembly, connection registry, and
/// stats, reached only through events and actions.
pub struct ProxyDriver<E: Environment> {
    reassembly: ReassemblyTable<E::Instant>,
    stats: ConnectionStats,
    registry: ConnectionRegistry,
    env: E,
}

impl<E: Environment> ProxyDriver<E> {
    /// A fresh driver with empty reassembly/stats/registry state.
    pub fn new(env: E) -> Self {
        Self {
            reassembly: ReassemblyTable::new(),
            stats: ConnectionStats::new(),
            registry: ConnectionRegistry::new(),
            env,
        }
    }

    /// Process one event, returning the actions the executor must carry
    /// out.
    pub fn handle_event(&mut self, event: ProxyEvent) -> Vec<ProxyAction> {
        match event {
            ProxyEvent::CentralConnected { device_path } => self.handle_connected(&device_path),
            ProxyEvent::CentralDisconnected { device_path } => {
                self.handle_disconnected(&device_path)
            },
            ProxyEvent::RequestWrite { device_path, bytes } => {
                self.handle_request_write(&device_path, &bytes)
            },
            ProxyEvent::GcTick => self.handle_gc_tick(),
        }
    }

    fn handle_connected(&mut self, device_path: &str) -> Vec<ProxyAction> {
        self.registry.mark_connected(device_path);
        self.stats.mark_connected();
        vec![ProxyAction::Log {
            level: LogLevel::Info,
            message: format!("central connected: {device_path}"),
        }]
    }

    fn handle_disconnected(&mut self, device_path: &str) -> Vec<ProxyAction> {
        let dropped = self.reassembly.remove_owned_by(device_path);
        let cancelled = self.registry.disconnect(device_path);
        self.stats.mark_disconnected();
        vec![ProxyAction::Log {
            level: LogLevel::Info,
            message: format!(
                "central disconnected: {device_path} ({dropped} pending request(s) dropped, \
                 {cancelled} worker(s) cancelled)"
            ),
        }]
    }

    fn handle_request_write(&mut self, device_path: &str, bytes: &[u8]) -> Vec<ProxyAction> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => return vec![frame_decode_warning(&err)],
        };

        let payload_len = frame.payload.len() as u64;
        let now = self.env.now();
        let outcome = self.reassembly.admit(&frame, device_path, now);

        match outcome {
            AdmitOutcome::Buffered => {
                self.stats.record_bytes(0, payload_len);
                Vec::new()
            },
            AdmitOutcome::Complete(request) => {
                self.stats.record_bytes(0, payload_len);
                self.stats.record_request_complete();
                vec![ProxyAction::DispatchRequest {
                    correlation_id: frame.id,
                    device_path: device_path.to_string(),
                    request,
                }]
            },
            AdmitOutcome::Oversize => {
                vec![ProxyAction::RespondSynthesized {
                    correlation_id: frame.id,
                    device_path: device_path.to_string(),
                    response: origin::oversize_response(),
                }]
            },
            AdmitOutcome::UnknownId => vec![ProxyAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "continuation frame for unknown correlation id from {device_path}"
                ),
            }],
            AdmitOutcome::Overload => vec![ProxyAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "reassembly table at capacity; rejecting new request from {device_path}"
                ),
            }],
        }
    }

    fn handle_gc_tick(&mut self) -> Vec<ProxyAction> {
        let swept = self.reassembly.sweep(self.env.now());
        if swept == 0 {
            return Vec::new();
        }
        vec![ProxyAction::Log {
            level: LogLevel::Debug,
            message: format!("GC sweep collected {swept} abandoned request(s)"),
        }]
    }

    /// Register a worker for `correlation_id`, owned by `device_path`,
    /// returning its cancellation token. Called by the executor after
    /// receiving [`ProxyAction::DispatchRequest`], before spawning the
    /// worker task.
    pub fn spawn_worker_token(
        &mut self,
        device_path: &str,
        correlation_id: CorrelationId,
    ) -> CancellationToken {
        self.registry.spawn_worker(device_path, correlation_id)
    }

    /// Mark a worker finished, called by the executor once a dispatched
    /// request's response has been emitted (or abandoned).
    pub fn worker_finished(&mut self, device_path: &str, correlation_id: &CorrelationId) {
        self.registry.worker_finished(device_path, correlation_id);
    }

    /// Record bytes emitted on the Response characteristic, for the
    /// `total_bytes_sent` counter.
    pub fn record_bytes_sent(&self, sent: u64) {
        self.stats.record_bytes(sent, 0);
    }

    /// Cancel every in-flight worker, used on process termination.
    pub fn cancel_all_workers(&self) {
        self.registry.cancel_all();
    }

    /// Current number of connected centrals, for diagnostics.
    #[must_use]
    pub fn connected_centrals(&self) -> usize {
        self.registry.connected_count()
    }

    /// Compose a point-in-time status snapshot.
    #[must_use]
    pub fn snapshot(&self, context: SnapshotContext) -> StatusSnapshot {
        self.stats.snapshot(context)
    }
}

fn frame_decode_warning(err: &FrameError) -> ProxyAction {
    ProxyAction::Log { level: LogLevel::Warn, message: format!("rejecting malformed frame: {err}") }
}
