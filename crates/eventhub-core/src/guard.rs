//! Brute-force reconnection guard.
//!
//! Anonymous clients that hammer the socket/stream endpoints are throttled:
//! a second attempt from the same sender within the guard interval is
//! treated as an attack.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::ids::SenderFingerprint;

/// Shortest accepted guard interval, in seconds.
pub const BRUTEFORCE_MIN_SECS: u64 = 3;
/// Longest accepted guard interval, in seconds.
pub const BRUTEFORCE_MAX_SECS: u64 = 60;
/// Default guard interval, in seconds.
pub const BRUTEFORCE_DEFAULT_SECS: u64 = 10;
/// Map size above which `check` sweeps expired entries inline.
pub const GUARD_SWEEP_THRESHOLD: usize = 4096;

/// Last-attempt map keyed by sender fingerprint.
#[derive(Debug)]
pub struct BruteForceGuard {
    interval: Duration,
    attempts: HashMap<SenderFingerprint, Instant>,
}

impl Default for BruteForceGuard {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(BRUTEFORCE_DEFAULT_SECS),
            attempts: HashMap::new(),
        }
    }
}

impl BruteForceGuard {
    /// Create a guard with the default interval.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Set the interval in seconds. Values outside
    /// `BRUTEFORCE_MIN_SECS..=BRUTEFORCE_MAX_SECS` are rejected.
    pub fn set_interval_secs(&mut self, secs: u64) -> bool {
        if !(BRUTEFORCE_MIN_SECS..=BRUTEFORCE_MAX_SECS).contains(&secs) {
            return false;
        }
        self.interval = Duration::from_secs(secs);
        true
    }

    /// Record an attempt. Returns `true` when the sender already tried within
    /// the interval; the earlier timestamp is kept in that case.
    pub fn check(&mut self, sender: SenderFingerprint) -> bool {
        let now = Instant::now();
        let recent = self
            .attempts
            .get(&sender)
            .is_some_and(|last| now.duration_since(*last) < self.interval);
        if recent {
            return true;
        }
        let _ = self.attempts.insert(sender, now);
        if self.attempts.len() > GUARD_SWEEP_THRESHOLD {
            let _ = self.sweep();
        }
        false
    }

    /// Drop entries older than the interval. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let interval = self.interval;
        let before = self.attempts.len();
        self.attempts
            .retain(|_, last| now.duration_since(*last) < interval);
        before - self.attempts.len()
    }

    /// Number of tracked senders.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Whether no sender is tracked.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
