//! Environment abstraction for deterministic testing.
//!
//! Decouples the reassembly table and stats tracker from wall-clock time so
//! GC sweeps and rate-limiting windows can be exercised deterministically in
//! tests, while production uses real system time.

use std::time::Duration;

/// Abstract environment providing time and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; test environments
    /// may use a manually-advanced fake clock.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the only async method in the trait, used by driver-level
    /// pacing (notification backoff, GC sweep intervals) rather than by
    /// pure reassembly logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Seconds since the Unix epoch, for the status document's `uptime`
    /// and timestamp fields.
    fn wall_clock_secs(&self) -> u64;
}
