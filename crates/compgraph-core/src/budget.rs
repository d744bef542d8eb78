//! Abstract memory budget interfaces.
//!
//! The concrete implementation (the memory watchdog) lives in `compgraph-mem`.
//! We keep only traits here so any crate can depend on the API without pulling
//! the spill logic.

/// A guard returned by a memory budget when bytes are acquired.
///
/// The concrete type lives in `compgraph-mem`. It must be RAII (releases on Drop).
pub trait BudgetGuard: Send {
    /// Number of bytes currently accounted for by this guard.
    fn bytes(&self) -> usize;

    /// Grow or shrink the accounted bytes. Shrinking always succeeds; a failed
    /// grow means the ceiling would be crossed and leaves the guard unchanged.
    fn try_resize(&mut self, new_bytes: usize) -> bool;
}

/// A handle representing a memory-ceiling enforcer.
///
/// Operators call `try_acquire` (or grow a guard) before accumulating rows.
/// If `None` is returned, they must spill.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// Attempt to acquire `bytes` from the live budget. Returns a guard on success.
    /// `tag` names the caller in trace output when the request is refused.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    /// Total configured capacity (bytes).
    fn capacity_bytes(&self) -> usize;

    /// Approximate currently used bytes (advisory; not a correctness API).
    fn used_bytes(&self) -> usize;

    /// Whether estimated usage has reached the configured ceiling.
    fn under_pressure(&self) -> bool {
        self.used_bytes() >= self.capacity_bytes()
    }
}
