//! Per-window latency summary via nested top-k selection.
//!
//! Only three order statistics are needed per window, so instead of sorting
//! every window the estimator keeps a bounded min-heap of the largest
//! durations and narrows it down three times:
//!
//! ```text
//! h = n / 2      top-h of the window      min(top-h) = p50
//! t = h / 5      top-t of the top-h set   min(top-t) = p90
//! o = t / 10     top-o of the top-t set   min(top-o) = p99
//! ```
//!
//! When a level is empty (`h`, `t` or `o` is 0) the remaining percentiles take
//! the maximum of the previous level. Cost is `O(n log h)`.

use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::metric::TaskRecord;

/// The `k` largest durations seen by [`TopK::select`].
///
/// Backed by a min-heap of capacity `k`: while under capacity every value is
/// pushed; once full an incoming value only replaces the current minimum when
/// it is strictly larger. The minimum of the retained set is therefore the
/// k-th largest value of the input.
#[derive(Debug, Clone)]
pub struct TopK {
    heap: BinaryHeap<Reverse<Duration>>,
}

impl TopK {
    pub fn select(durations: impl IntoIterator<Item = Duration>, k: usize) -> Self {
        let mut heap = BinaryHeap::with_capacity(k);
        if k == 0 {
            return Self { heap };
        }

        for d in durations {
            if heap.len() < k {
                heap.push(Reverse(d));
            } else if let Some(mut min) = heap.peek_mut() {
                if min.0 < d {
                    *min = Reverse(d);
                }
            }
        }

        Self { heap }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Smallest retained duration, i.e. the k-th largest of the input.
    pub fn min(&self) -> Duration {
        self.heap.peek().map(|r| r.0).unwrap_or_default()
    }

    /// Largest retained duration.
    pub fn max(&self) -> Duration {
        self.iter().max().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = Duration> + '_ {
        self.heap.iter().map(|r| r.0)
    }
}

/// Latency and throughput figures of one window, before host metrics are added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub average: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
    /// Number of records in the window.
    pub qps: u64,
    pub errors: u64,
    pub error_rate: f64,
}

/// Summarizes a closed window.
///
/// An empty window yields an all-zero summary.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use pacebench::{TaskRecord, percentile::estimate};
/// use tokio::time::Instant;
///
/// let now = Instant::now();
/// let records: Vec<_> = (1..=100)
///     .map(|ms| TaskRecord::new(now, Duration::from_millis(ms), ms % 10 == 0))
///     .collect();
///
/// let summary = estimate(&records);
/// assert_eq!(summary.qps, 100);
/// assert_eq!(summary.p50, Duration::from_millis(51));
/// assert_eq!(summary.p90, Duration::from_millis(91));
/// assert_eq!(summary.p99, Duration::from_millis(100));
/// assert_eq!(summary.error_rate, 0.1);
/// ```
pub fn estimate(records: &[TaskRecord]) -> Summary {
    let n = records.len();
    if n == 0 {
        return Summary::default();
    }

    let total: u128 = records.iter().map(|r| r.duration.as_nanos()).sum();
    let average = Duration::from_nanos((total / n as u128).min(u64::MAX as u128) as u64);
    let errors = records.iter().filter(|r| r.failed).count() as u64;
    let (p50, p90, p99) = percentiles(records.iter().map(|r| r.duration), n);

    Summary {
        average,
        p50,
        p90,
        p99,
        qps: n as u64,
        errors,
        error_rate: errors as f64 / n as f64,
    }
}

fn percentiles(
    durations: impl Iterator<Item = Duration>,
    n: usize,
) -> (Duration, Duration, Duration) {
    let half = n / 2;
    if half == 0 {
        let top = TopK::select(durations, 1).max();
        return (top, top, top);
    }

    let top_half = TopK::select(durations, half);
    let p50 = top_half.min();

    let tenth = half / 5;
    if tenth == 0 {
        let top = top_half.max();
        return (p50, top, top);
    }

    let top_tenth = TopK::select(top_half.iter(), tenth);
    let p90 = top_tenth.min();

    let hundredth = tenth / 10;
    if hundredth == 0 {
        return (p50, p90, top_tenth.max());
    }

    let p99 = TopK::select(top_tenth.iter(), hundredth).min();
    (p50, p90, p99)
}
