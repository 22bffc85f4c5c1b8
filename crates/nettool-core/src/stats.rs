//! Connection and throughput statistics, and the JSON status document
//! served from the Status characteristic.

use std::{
    sync::Mutex,
    time::Duration,
};

use serde::Serialize;

/// Minimum interval between snapshot rebuilds used for notification
/// purposes; direct reads always compute a fresh snapshot.
pub const SNAPSHOT_NOTIFY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Counters {
    total_connections: u64,
    total_requests: u64,
    total_bytes_sent: u64,
    total_bytes_received: u64,
    connected_clients: u64,
}

/// Thread-safe accumulator for the counters and gauges backing the status
/// document.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    counters: Mutex<Counters>,
}

impl ConnectionStats {
    /// A fresh, zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new central connection. Idempotent is the caller's
    /// responsibility: call once per transport-level connect event.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn mark_connected(&self) {
        let mut c = self.counters.lock().expect("stats mutex poisoned");
        c.total_connections += 1;
        c.connected_clients += 1;
    }

    /// Record a central disconnecting.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn mark_disconnected(&self) {
        let mut c = self.counters.lock().expect("stats mutex poisoned");
        c.connected_clients = c.connected_clients.saturating_sub(1);
    }

    /// Record bytes sent on the Response characteristic and/or received
    /// on the Request characteristic.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn record_bytes(&self, sent: u64, received: u64) {
        let mut c = self.counters.lock().expect("stats mutex poisoned");
        c.total_bytes_sent += sent;
        c.total_bytes_received += received;
    }

    /// Record that a reassembly entry reached COMPLETE and was dispatched
    /// to a worker.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn record_request_complete(&self) {
        let mut c = self.counters.lock().expect("stats mutex poisoned");
        c.total_requests += 1;
    }

    /// Compose a point-in-time status document.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn snapshot(&self, context: SnapshotContext) -> StatusSnapshot {
        let c = self.counters.lock().expect("stats mutex poisoned");
        StatusSnapshot {
            status: context.status,
            uptime: context.uptime_secs,
            http_port: context.http_port,
            total_connections: c.total_connections,
            total_requests: c.total_requests,
            total_bytes_sent: c.total_bytes_sent,
            total_bytes_received: c.total_bytes_received,
            connected_clients: c.connected_clients,
            cpu_percent: context.cpu_percent,
            memory_percent: context.memory_percent,
        }
    }
}

/// Values external to the counters that a snapshot needs: process
/// lifecycle state, configuration, and (optional) host sampling.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotContext {
    /// `"running"`, `"starting"`, or `"stopping"`.
    pub status: &'static str,
    /// Seconds since process start.
    pub uptime_secs: u64,
    /// The configured upstream HTTP port.
    pub http_port: u16,
    /// Instantaneous CPU usage percentage, if sampling succeeded.
    pub cpu_percent: Option<f32>,
    /// Instantaneous memory usage percentage, if sampling succeeded.
    pub memory_percent: Option<f32>,
}

/// The JSON document served from (and notified on) the Status
/// characteristic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// `"running"`, `"starting"`, or `"stopping"`.
    pub status: &'static str,
    /// Seconds since process start.
    pub uptime: u64,
    /// The configured upstream HTTP port.
    pub http_port: u16,
    /// Cumulative connection count.
    pub total_connections: u64,
    /// Cumulative count of completed reassemblies dispatched to workers.
    pub total_requests: u64,
    /// Cumulative frame payload bytes emitted on the Response
    /// characteristic.
    pub total_bytes_sent: u64,
    /// Cumulative frame payload bytes accepted on the Request
    /// characteristic.
    pub total_bytes_received: u64,
    /// Current number of connected centrals.
    pub connected_clients: u64,
    /// Instantaneous CPU usage percentage, omitted if unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    /// Instantaneous memory usage percentage, omitted if unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f32>,
}

impl StatusSnapshot {
    /// Serialize to the UTF-8 JSON bytes placed on the Status
    /// characteristic.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SnapshotContext {
        SnapshotContext {
            status: "running",
            uptime_secs: 42,
            http_port: 8080,
            cpu_percent: None,
            memory_percent: None,
        }
    }

    #[test]
    fn fresh_stats_snapshot_is_all_zero() {
        let stats = ConnectionStats::new();
        let snap = stats.snapshot(ctx());

        assert_eq!(snap.total_connections, 0);
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.connected_clients, 0);
    }

    #[test]
    fn connect_disconnect_tracks_gauge_and_cumulative() {
        let stats = ConnectionStats::new();
        stats.mark_connected();
        stats.mark_connected();
        stats.mark_disconnected();

        let snap = stats.snapshot(ctx());
        assert_eq!(snap.total_connections, 2);
        assert_eq!(snap.connected_clients, 1);
    }

    #[test]
    fn disconnect_gauge_never_underflows() {
        let stats = ConnectionStats::new();
        stats.mark_disconnected();
        assert_eq!(stats.snapshot(ctx()).connected_clients, 0);
    }

    #[test]
    fn record_bytes_accumulates() {
        let stats = ConnectionStats::new();
        stats.record_bytes(10, 20);
        stats.record_bytes(5, 0);

        let snap = stats.snapshot(ctx());
        assert_eq!(snap.total_bytes_sent, 15);
        assert_eq!(snap.total_bytes_received, 20);
    }

    #[test]
    fn request_complete_increments_once_per_call() {
        let stats = ConnectionStats::new();
        stats.record_request_complete();
        stats.record_request_complete();
        assert_eq!(stats.snapshot(ctx()).total_requests, 2);
    }

    #[test]
    fn optional_fields_omitted_when_absent() {
        let stats = ConnectionStats::new();
        let snap = stats.snapshot(ctx());
        let json = serde_json::to_string(&snap).expect("serializes");

        assert!(!json.contains("cpu_percent"));
        assert!(!json.contains("memory_percent"));
    }

    #[test]
    fn optional_fields_present_when_sampled() {
        let stats = ConnectionStats::new();
        let mut context = ctx();
        context.cpu_percent = Some(12.5);
        context.memory_percent = Some(33.0);

        let json = serde_json::to_string(&stats.snapshot(context)).expect("serializes");
        assert!(json.contains("\"cpu_percent\":12.5"));
        assert!(json.contains("\"memory_percent\":33.0"));
    }
}
