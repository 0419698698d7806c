use tokio::sync::mpsc;

use crate::{aggregate::SharedBucket, executor::rate::ExecutionContext, metric::TaskRecord};

/// Most records appended under a single lock acquisition.
pub const COLLECT_BATCH: usize = 256;

/// Single appender of the active bucket.
///
/// Drains the workers' records as fast as they arrive, taking whatever is
/// already queued in one batch so the lock is acquired once per batch rather
/// than once per record. Stops at shutdown, or when every worker has hung up.
///
/// Returns the number of records appended.
pub(crate) async fn collector_task(
    ctx: ExecutionContext,
    mut rx: mpsc::Receiver<TaskRecord>,
    bucket: SharedBucket,
) -> u64 {
    let mut shutdown = ctx.shutdown;
    let mut batch = Vec::with_capacity(COLLECT_BATCH);
    let mut collected = 0u64;
    tracing::debug!("Collector started.");

    loop {
        // Receive the first record or stop
        let first = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            record = rx.recv() => match record {
                Some(r) => r,
                None => break,
            },
        };
        batch.push(first);

        // Take everything else already waiting
        while batch.len() < COLLECT_BATCH {
            match rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }

        collected += batch.len() as u64;
        bucket.lock().extend(batch.drain(..));
    }

    tracing::debug!("Collector stopped after {collected} records.");
    collected
}
