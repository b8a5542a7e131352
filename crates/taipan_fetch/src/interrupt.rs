//! The process-wide interrupt flag.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cloneable interrupt flag. The download driver observes it between
/// poll cycles; setting it tears down the in-flight transfers and makes
/// the engine return `Interrupted`.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// Creates a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests interruption.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns true when interruption was requested.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
