//! Wall-clock abstraction.
//!
//! Every timestamp in the system flows through [`Clock`] so flows and tests
//! share one time source. Granularity is whole seconds.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Epoch-second time source.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time as Unix epoch seconds.
    fn now(&self) -> i64;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    /// Move the clock to a new instant.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
