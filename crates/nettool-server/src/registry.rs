//! Per-central bookkeeping: which device path owns which in-flight
//! worker, so a disconnect can cancel exactly the workers it owns without
//! touching any other central's in-flight requests.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

/// Tracks, for each connected central (identified by its BlueZ object
/// path), the cancellation tokens of its currently-running workers.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    root: CancellationToken,
    centrals: HashMap<String, CentralEntry>,
}

#[derive(Debug, Default)]
struct CentralEntry {
    workers: HashMap<[u8; 16], CancellationToken>,
}

impl ConnectionRegistry {
    /// A new, empty registry with a fresh root cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self { root: CancellationToken::new(), centrals: HashMap::new() }
    }

    /// Register a newly connected central. Idempotent.
    pub fn mark_connected(&mut self, device_path: &str) {
        self.centrals.entry(device_path.to_string()).or_default();
    }

    /// Register a worker for `correlation_id`, owned by `device_path`,
    /// returning its cancellation token (a child of the process root
    /// token, so a global shutdown cancels everything too).
    pub fn spawn_worker(&mut self, device_path: &str, correlation_id: [u8; 16]) -> CancellationToken {
        let token = self.root.child_token();
        self.centrals
            .entry(device_path.to_string())
            .or_default()
            .workers
            .insert(correlation_id, token.clone());
        token
    }

    /// Mark a worker finished, removing its bookkeeping entry.
    pub fn worker_finished(&mut self, device_path: &str, correlation_id: &[u8; 16]) {
        if let Some(entry) = self.centrals.get_mut(device_path) {
            entry.workers.remove(correlation_id);
        }
    }

    /// A central disconnected: cancel every worker it owns and drop its
    /// bookkeeping. Returns the number of workers cancelled.
    pub fn disconnect(&mut self, device_path: &str) -> usize {
        let Some(entry) = self.centrals.remove(device_path) else {
            return 0;
        };
        let count = entry.workers.len();
        for (_, token) in entry.workers {
            token.cancel();
        }
        count
    }

    /// Cancel every worker across every central, used on process
    /// termination.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Whether a device path is currently tracked as connected.
    #[must_use]
    pub fn is_connected(&self, device_path: &str) -> bool {
        self.centrals.contains_key(device_path)
    }

    /// Number of connected centrals.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.centrals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_disconnect_cancels_only_owned_workers() {
        let mut registry = ConnectionRegistry::new();
        registry.mark_connected("/dev/a");
        registry.mark_connected("/dev/b");

        let token_a = registry.spawn_worker("/dev/a", [1u8; 16]);
        let token_b = registry.spawn_worker("/dev/b", [2u8; 16]);

        let cancelled = registry.disconnect("/dev/a");

        assert_eq!(cancelled, 1);
        assert!(token_a.is_cancelled());
        assert!(!token_b.is_cancelled());
        assert!(!registry.is_connected("/dev/a"));
        assert!(registry.is_connected("/dev/b"));
    }

    #[test]
    fn worker_finished_removes_bookkeeping_without_cancelling() {
        let mut registry = ConnectionRegistry::new();
        registry.mark_connected("/dev/a");
        let token = registry.spawn_worker("/dev/a", [1u8; 16]);

        registry.worker_finished("/dev/a", &[1u8; 16]);

        assert!(!token.is_cancelled());
        assert_eq!(registry.disconnect("/dev/a"), 0);
    }

    #[test]
    fn cancel_all_cancels_every_worker() {
        let mut registry = ConnectionRegistry::new();
        registry.mark_connected("/dev/a");
        let token = registry.spawn_worker("/dev/a", [1u8; 16]);

        registry.cancel_all();

        assert!(token.is_cancelled());
    }

    #[test]
    fn disconnect_unknown_central_is_a_no_op() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.disconnect("/dev/missing"), 0);
    }
}
