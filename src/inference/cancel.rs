//! Cooperative cancellation
//!
//! Generation is stopped by a shared flag that the worker polls between
//! output increments; nothing is interrupted preemptively. The engine resets
//! the flag when it accepts a generation, so a stale cancellation can never
//! suppress a later, unrelated request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle over the shared cancellation flag.
///
/// Clones observe the same flag; `reset` belongs to the engine at
/// generation-acceptance time.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the generation this token is attached to
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Polled by the worker between output increments
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Clear the flag; called once per generation at acceptance
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}
