//! Configuration for the sync engine.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Configuration for the intent engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identifier of this site, stamped on every outgoing operation.
    pub site_id: String,
    /// How many dependency pushes may nest below one top-level push.
    pub max_dependency_depth: usize,
    /// Whether `unchanged` and `handler-denied` verdicts are written to the
    /// status record as soft failures.
    pub record_soft_failures: bool,
}

impl EngineConfig {
    /// Creates a configuration for the given site.
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            max_dependency_depth: 16,
            record_soft_failures: true,
        }
    }

    /// Sets the dependency depth limit.
    pub fn with_max_dependency_depth(mut self, depth: usize) -> Self {
        self.max_dependency_depth = depth;
        self
    }

    /// Enables or disables soft-failure bookkeeping.
    pub fn with_soft_failures(mut self, record: bool) -> Self {
        self.record_soft_failures = record;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("local")
    }
}

/// Source of "now" for timestamps written by the engine.
pub trait Clock: Send + Sync {
    /// Current time in unix seconds.
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

/// A manually advanced clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    /// Creates a clock stopped at `now`.
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
