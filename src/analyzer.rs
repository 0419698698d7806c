//! Closing one-second windows while the run is in progress.
//!
//! The analyzer fires `settle` after every second boundary of the run. Each
//! firing cuts every record that started before the last full boundary out of
//! the shared bucket, groups the cut records by the second they started in,
//! and turns each group into a [`MetricsWindow`].
//!
//! A record that arrives after its own second was closed (an invocation that
//! outlived `settle`) is folded into the earliest second still open, so every
//! collected record lands in exactly one window. The second that is still
//! open when the run stops is never closed.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{
    aggregate::SharedBucket,
    executor::rate::ExecutionContext,
    host::{self, HostMetrics},
    metric::TaskRecord,
    percentile,
    report::{MetricsTable, MetricsWindow},
};

const WINDOW: Duration = Duration::from_secs(1);
const SECONDS_PER_MINUTE: u64 = 60;

pub struct Analyzer {
    bucket: SharedBucket,
    host: Arc<dyn HostMetrics>,
    started_at: Instant,
    settle: Duration,
    /// First second that has not been closed yet.
    next_second: u64,
    table: MetricsTable,
}

impl Analyzer {
    pub fn new(
        bucket: SharedBucket,
        host: Arc<dyn HostMetrics>,
        started_at: Instant,
        settle: Duration,
        table: MetricsTable,
    ) -> Self {
        Self {
            bucket,
            host,
            started_at,
            settle,
            next_second: 0,
            table,
        }
    }

    /// Closes every second that ended at least `settle` before `now`.
    ///
    /// Returns the seconds for which a window was stored. Seconds without any
    /// record produce no window.
    pub fn rotate(&mut self, now: Instant) -> Vec<u64> {
        let elapsed = now
            .saturating_duration_since(self.started_at)
            .saturating_sub(self.settle);
        let closed = elapsed.as_secs();
        if closed <= self.next_second {
            return Vec::new();
        }

        let boundary = self.started_at + Duration::from_secs(closed);
        let cut = self.bucket.lock().cut_before(boundary);

        let first_open = self.next_second;
        self.next_second = closed;
        if cut.is_empty() {
            return Vec::new();
        }

        let mut by_second: BTreeMap<u64, Vec<TaskRecord>> = BTreeMap::new();
        for record in cut {
            let second = record.second_offset(self.started_at).max(first_open);
            by_second.entry(second).or_default().push(record);
        }

        let (cpu, memory) = host::sample(self.host.as_ref());
        by_second
            .into_iter()
            .map(|(second, records)| {
                let window = MetricsWindow::new(percentile::estimate(&records), cpu, memory);
                tracing::debug!(
                    "Second {second}: {} invocations, avg {:?}, p99 {:?}",
                    window.qps,
                    window.average,
                    window.p99
                );
                self.table.insert(second, window);
                second
            })
            .collect()
    }

    /// Closes windows once a second until shutdown, then hands back the table.
    ///
    /// No final rotation happens on shutdown.
    pub(crate) async fn run(mut self, ctx: ExecutionContext) -> MetricsTable {
        let mut shutdown = ctx.shutdown;
        let first = self.started_at + WINDOW + self.settle;
        let mut ticker = time::interval_at(first, WINDOW);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!("Analyzer started.");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {
                    let before = self.next_second;
                    self.rotate(Instant::now());
                    self.log_progress(before);
                }
            }
        }

        tracing::debug!("Analyzer stopped with {} windows.", self.table.len());
        self.table
    }

    fn log_progress(&self, before: u64) {
        let crossed = (before + 1..=self.next_second)
            .rev()
            .find(|s| s % SECONDS_PER_MINUTE == 0);
        if let Some(second) = crossed {
            tracing::info!("{}m elapsed", second / SECONDS_PER_MINUTE);
        }
    }
}
