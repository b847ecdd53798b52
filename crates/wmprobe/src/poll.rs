//! Bounded polling with exponential backoff
//!
//! Everything the harness waits on (server sockets, manager readiness,
//! reparenting) is driven by another process's event loop. Waits go through
//! [`PollPolicy::poll`] so a broken manager can never hang a run.

use std::thread;
use std::time::{Duration, Instant};

/// Smallest sleep between probes; keeps a zero interval from spinning
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Timeout and backoff schedule for a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total time to keep probing
    pub timeout: Duration,
    /// Sleep after the first unsuccessful probe
    pub initial_interval: Duration,
    /// Upper bound for the doubling sleep
    pub max_interval: Duration,
}

impl PollPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(250),
        }
    }

    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval = initial;
        self.max_interval = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep schedule between probes
    pub fn backoff(&self) -> Backoff {
        let max = self.max_interval.max(MIN_INTERVAL);
        Backoff {
            next: self.initial_interval.clamp(MIN_INTERVAL, max),
            max,
        }
    }

    /// Probe until it yields a value or the timeout elapses
    ///
    /// Returns `Ok(None)` only once the full timeout has passed; the probe is
    /// always run at least once. Probe errors end the wait immediately.
    pub fn poll<T, E, F>(&self, mut probe: F) -> Result<Option<T>, E>
    where
        F: FnMut() -> Result<Option<T>, E>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut backoff = self.backoff();

        loop {
            if let Some(value) = probe()? {
                return Ok(Some(value));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let interval = backoff.next().unwrap_or(self.max_interval);
            thread::sleep(interval.min(deadline - now));
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Doubling interval sequence capped at a maximum (never ends)
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}
