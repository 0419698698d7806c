use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::metric::TaskRecord;

/// The bucket shared between the collector (appends) and the analyzer (cuts).
///
/// This is the only piece of mutable state touched by more than one role.
/// Critical sections are kept to a single append or a single cut and never
/// span an `.await`.
pub type SharedBucket = Arc<Mutex<ActiveBucket>>;

/// Completed records not yet attributed to a closed one-second window.
///
/// The bucket is append-only between cuts. Records are kept in arrival order,
/// which is not necessarily `start` order when several workers report
/// concurrently, so cuts look at every record instead of a prefix.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use pacebench::{ActiveBucket, TaskRecord};
/// use tokio::time::Instant;
///
/// let origin = Instant::now();
/// let mut bucket = ActiveBucket::default();
/// bucket.push(TaskRecord::new(origin, Duration::from_millis(3), false));
/// bucket.push(TaskRecord::new(origin + Duration::from_secs(1), Duration::from_millis(4), false));
///
/// let closed = bucket.cut_before(origin + Duration::from_secs(1));
/// assert_eq!(closed.len(), 1);
/// assert_eq!(bucket.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ActiveBucket {
    records: Vec<TaskRecord>,
}

impl ActiveBucket {
    pub fn shared() -> SharedBucket {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn push(&mut self, record: TaskRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = TaskRecord>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes and returns every record that started strictly before `boundary`.
    ///
    /// Records that started at or after `boundary` stay in the bucket, in
    /// their original relative order.
    pub fn cut_before(&mut self, boundary: Instant) -> Vec<TaskRecord> {
        let (closed, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.start < boundary);
        self.records = open;
        closed
    }
}
