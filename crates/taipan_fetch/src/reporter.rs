//! The progress interface the engine publishes events to. The engine
//! never renders anything itself; a CLI implements this trait.

/// A sink for the progress of a single transfer. All calls happen on
/// the driver task, never from inside transfer internals.
pub trait ProgressSink: Send + Sync {
    /// The transfer has progressed to `done` of `total` bytes (`total`
    /// is `None` when the server did not announce a length).
    fn update(&self, done: u64, total: Option<u64>);

    /// The current transfer speed in bytes per second.
    fn set_speed(&self, bytes_per_second: u64);

    /// Free-form status text, e.g. "waiting 1s before retry".
    fn set_postfix(&self, text: &str);

    /// The transfer finished (successfully or not).
    fn mark_completed(&self);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&self, _done: u64, _total: Option<u64>) {}
    fn set_speed(&self, _bytes_per_second: u64) {}
    fn set_postfix(&self, _text: &str) {}
    fn mark_completed(&self) {}
}
