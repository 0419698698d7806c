//! The lifecycle of a run: start every role, wait for a stop trigger, shut
//! down cooperatively and hand back the finished table.
use std::{fmt, future::Future, sync::Arc};

use futures::future::join_all;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{
    aggregate::ActiveBucket,
    analyzer::Analyzer,
    collector::collector_task,
    config::BenchConfig,
    error::Result,
    executor::rate::{ExecutionContext, scheduler_task, spawn_workers},
    host::{HostMetrics, SystemHostMetrics},
    metric::Outcome,
    report::MetricsTable,
};

/// Records each worker may have in flight toward the collector.
const RECORDS_PER_WORKER: usize = 16;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured duration elapsed.
    Elapsed,
    /// [`StopHandle::stop`] was called.
    Requested,
    /// Ctrl-C was received.
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Elapsed => write!(f, "duration elapsed"),
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Stops a running [`Bench`] from anywhere.
///
/// Stopping before the run starts makes the run end right away; stopping
/// more than once has no further effect.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// A single load-generation run.
///
/// # Example
/// ```rust,no_run
/// use std::time::Duration;
/// use pacebench::{Bench, BenchConfig, Reporter, StdoutReporter};
///
/// #[tokio::main]
/// async fn main() -> pacebench::Result<()> {
///     let config = BenchConfig::builder()
///         .rate(200.0)
///         .duration(Duration::from_secs(10))
///         .title("sleep 5ms")
///         .build();
///
///     let table = Bench::new(config)?
///         .run(|| async { tokio::time::sleep(Duration::from_millis(5)).await })
///         .await?;
///
///     StdoutReporter.report(&table).await
/// }
/// ```
pub struct Bench {
    config: BenchConfig,
    host: Arc<dyn HostMetrics>,
    stop: Arc<watch::Sender<bool>>,
}

impl Bench {
    /// Validates `config`. This is the only place a run can be refused.
    pub fn new(config: BenchConfig) -> Result<Self> {
        config.validate()?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            config,
            host: Arc::new(SystemHostMetrics::new()),
            stop: Arc::new(stop),
        })
    }

    /// Replaces the source of host CPU and memory figures.
    pub fn with_host_metrics(mut self, host: Arc<dyn HostMetrics>) -> Self {
        self.host = host;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop.clone(),
        }
    }

    /// Invokes `action` at the configured rate until a stop trigger fires.
    ///
    /// The action's output decides whether failures are tracked, see
    /// [`Outcome`]. Invocations still running at shutdown are given
    /// `drain_timeout` to finish; their records are discarded along with the
    /// rest of the open second.
    pub async fn run<F, Fut>(self, action: F) -> Result<MetricsTable>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Outcome,
    {
        let Bench { config, host, stop } = self;
        let workers = config.workers;
        let capacity = config.dispatch_capacity();

        let (ctx, shutdown_tx) = ExecutionContext::new();
        let bucket = ActiveBucket::shared();
        let (records_tx, records_rx) = mpsc::channel(workers.saturating_mul(RECORDS_PER_WORKER));
        let table = MetricsTable::new(config.title.clone(), <Fut::Output as Outcome>::TRACKS_ERRORS);
        let started_at = Instant::now();

        tracing::info!(
            "Running {:?} at {}/s with {workers} workers...",
            config.title,
            config.rate
        );
        let collector = tokio::spawn(collector_task(ctx.clone(), records_rx, bucket.clone()));
        let analyzer = tokio::spawn(
            Analyzer::new(bucket.clone(), host, started_at, config.settle, table).run(ctx.clone()),
        );
        let pool = spawn_workers(ctx.clone(), workers, action, records_tx);
        let scheduler = tokio::spawn(scheduler_task(
            ctx.clone(),
            config.rate,
            capacity,
            started_at,
        ));

        let reason = wait_for_stop(&config, started_at, stop.subscribe()).await;
        tracing::info!("Stopping: {reason}.");
        shutdown_tx.send_replace(true);
        ctx.tokens.close();

        let dropped = scheduler.await?;
        let completed = collector.await?;
        let mut table = analyzer.await?;
        drain(pool, &config).await;

        table.completed = completed;
        table.discarded = bucket.lock().len() as u64;
        if dropped > 0 {
            tracing::info!("{dropped} dispatches dropped, the pool could not keep up with the rate.");
        }
        tracing::info!(
            "Done: {} windows, {} invocations.",
            table.len(),
            table.total_qps()
        );
        Ok(table)
    }
}

/// Resolves on the first of: duration elapsed, stop requested, Ctrl-C.
async fn wait_for_stop(
    config: &BenchConfig,
    started_at: Instant,
    mut stop: watch::Receiver<bool>,
) -> StopReason {
    let elapsed = async {
        match config.duration {
            Some(d) => time::sleep_until(started_at + d).await,
            None => std::future::pending().await,
        }
    };
    let interrupted = async {
        if !config.handle_interrupt {
            return std::future::pending().await;
        }
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = stop.wait_for(|s| *s) => StopReason::Requested,
        _ = elapsed => StopReason::Elapsed,
        _ = interrupted => StopReason::Interrupted,
    }
}

/// Gives in-flight invocations `drain_timeout` to finish.
async fn drain(pool: Vec<JoinHandle<()>>, config: &BenchConfig) {
    match time::timeout(config.drain_timeout, join_all(pool)).await {
        Ok(results) => {
            for e in results.into_iter().filter_map(|r| r.err()) {
                tracing::error!("Worker panicked: {e}");
            }
        }
        Err(_) => tracing::warn!(
            "Some workers were still busy after {:?}, leaving them behind.",
            config.drain_timeout
        ),
    }
}
