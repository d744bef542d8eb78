//! The memory watchdog: a `MemoryBudget` with RAII guards.
//!
//! Stages must acquire a guard before holding rows. Dropping the guard
//! returns the bytes to the watchdog (panic-safe).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use compgraph_core::budget::{BudgetGuard, MemoryBudget};

use crate::tracking::PeakTracker;

/// Shared inner state for the watchdog.
struct WatchdogInner {
    capacity: usize,
    used: AtomicUsize,
    peak: PeakTracker,
}

impl WatchdogInner {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
            peak: PeakTracker::new(),
        }
    }

    fn try_acquire(&self, bytes: usize) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if next > self.capacity {
                return false;
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.peak.record_used(next);
                return true;
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Estimates bytes held by in-flight stages against a fixed ceiling.
///
/// Clones share the same counters.
#[derive(Clone)]
pub struct MemoryWatchdog {
    inner: Arc<WatchdogInner>,
}

impl MemoryWatchdog {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(WatchdogInner::new(capacity_bytes)),
        }
    }

    /// Current usage (advisory).
    pub fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    /// Highest usage observed since creation.
    pub fn peak_bytes(&self) -> usize {
        self.inner.peak.peak()
    }
}

impl std::fmt::Debug for MemoryWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWatchdog")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.used_bytes())
            .field("peak", &self.peak_bytes())
            .finish()
    }
}

/// RAII guard that accounts for a number of bytes.
/// Dropping it returns bytes to the watchdog.
pub struct WatchdogGuard {
    inner: Arc<WatchdogInner>,
    bytes: usize,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            // NOTE: do not log here to keep drop path fast.
            self.bytes = 0;
        }
    }
}

impl BudgetGuard for WatchdogGuard {
    fn bytes(&self) -> usize {
        self.bytes
    }

    /// Shrinking always succeeds; growing succeeds only if the extra bytes fit.
    fn try_resize(&mut self, new_bytes: usize) -> bool {
        if new_bytes == self.bytes {
            return true;
        }

        if new_bytes < self.bytes {
            let delta = self.bytes - new_bytes;
            self.inner.release(delta);
            self.bytes = new_bytes;
            true
        } else {
            let delta = new_bytes - self.bytes;
            if self.inner.try_acquire(delta) {
                self.bytes = new_bytes;
                true
            } else {
                false
            }
        }
    }
}

impl MemoryBudget for MemoryWatchdog {
    type Guard = WatchdogGuard;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard> {
        if bytes > 0 && !self.inner.try_acquire(bytes) {
            tracing::trace!(tag, bytes, used = self.used_bytes(), "watchdog refused guard");
            return None;
        }
        Some(WatchdogGuard {
            inner: Arc::clone(&self.inner),
            bytes,
        })
    }

    fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }
}
