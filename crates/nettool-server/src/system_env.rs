//! Production `Environment` implementation using system time.
//!
//! `SystemEnv` backs the reassembly table's GC sweep and the chunker's
//! backoff pacing with real wall-clock time. There is no RNG requirement
//! here (correlation IDs are chosen by the central, not generated by the
//! proxy), so this is considerably smaller than an environment that also
//! has to provide cryptographic randomness.

use std::time::Duration;

use nettool_core::env::Environment;

/// Production environment using system time.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::disallowed_methods, clippy::expect_used)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_secs()
    }
}
