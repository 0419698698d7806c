use std::time::Duration;

use tokio::time::Instant;

/// What a benchmarked action reports back once it finishes.
///
/// The engine only cares whether an invocation failed; the nature of the
/// failure is ignored. Two shapes are supported out of the box:
///
/// - `()`: the action cannot fail. Error tracking is disabled and every
///   window reports an error rate of 0.
/// - `Result<T, E>`: an `Err` marks the invocation as failed and counts
///   toward the window's error rate.
///
/// ## Example
/// ```rust
/// use pacebench::Outcome;
///
/// assert!(!<() as Outcome>::TRACKS_ERRORS);
/// assert!(Err::<(), _>("boom").is_failure());
/// assert!(!Ok::<_, String>(42).is_failure());
/// ```
pub trait Outcome: Send + 'static {
    /// Whether this outcome type can report failures at all.
    const TRACKS_ERRORS: bool;

    /// `true` when the invocation failed.
    fn is_failure(&self) -> bool;
}

impl Outcome for () {
    const TRACKS_ERRORS: bool = false;

    fn is_failure(&self) -> bool {
        false
    }
}

impl<T, E> Outcome for Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    const TRACKS_ERRORS: bool = true;

    fn is_failure(&self) -> bool {
        self.is_err()
    }
}

/// One completed invocation of the benchmarked action.
///
/// `start` decides which one-second window the record belongs to. Records
/// from a single worker are produced in `start` order, but records from
/// different workers can reach the collector in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRecord {
    pub start: Instant,
    pub duration: Duration,
    pub failed: bool,
}

impl TaskRecord {
    pub fn new(start: Instant, duration: Duration, failed: bool) -> Self {
        Self {
            start,
            duration,
            failed,
        }
    }

    /// Whole seconds between `origin` and the start of this invocation.
    ///
    /// Records that started before `origin` belong to second 0.
    pub fn second_offset(&self, origin: Instant) -> u64 {
        self.start.saturating_duration_since(origin).as_secs()
    }
}
