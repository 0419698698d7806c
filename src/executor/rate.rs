//! The fixed-rate scheduler and the worker pool it feeds.
//!
//! # High-level flow
//! 1. An [`ExecutionContext`] is created, holding the shutdown signal and the
//!    dispatch bucket (a `tokio::sync::Semaphore` starting with no permits).
//! 2. `spawn_workers` starts the pool. Each worker repeatedly takes a permit,
//!    runs the action once and sends a `TaskRecord` to the collector.
//! 3. `scheduler_task` adds permits as invocations come due, never storing
//!    more than the dispatch capacity.
//! 4. When shutdown is signalled the scheduler stops granting, idle workers
//!    exit, and busy workers finish their current invocation first.
use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{Semaphore, mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::metric::{Outcome, TaskRecord};

#[cfg(feature = "internals")]
pub use internals::*;

#[cfg(not(feature = "internals"))]
pub(crate) use internals::*;

/// Internal components of the rate engine.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use super::*;

    /// Shortest tick the timer can honour.
    pub const MIN_TICK: Duration = Duration::from_millis(1);
    /// The scheduler wakes at least this often, however low the rate.
    pub const MAX_TICK: Duration = Duration::from_secs(1);
    /// Absorbs float error when a tick lands exactly on a dispatch instant.
    const SCHEDULE_EPSILON: f64 = 1e-6;

    /// Shared state for the scheduler, the workers and the other engine roles.
    #[derive(Clone)]
    pub struct ExecutionContext {
        /// Flips to `true` once when the run stops.
        pub shutdown: watch::Receiver<bool>,
        /// Dispatch tokens. The scheduler adds permits, workers consume them.
        pub tokens: Arc<Semaphore>,
    }

    impl ExecutionContext {
        pub fn new() -> (Self, watch::Sender<bool>) {
            let (tx, rx) = watch::channel(false);
            (
                Self {
                    shutdown: rx,
                    tokens: Arc::new(Semaphore::new(0)),
                },
                tx,
            )
        }
    }

    /// Interval between scheduler ticks for `rate` invocations per second.
    pub fn dispatch_period(rate: f64) -> Duration {
        Duration::try_from_secs_f64(1.0 / rate)
            .unwrap_or(MAX_TICK)
            .clamp(MIN_TICK, MAX_TICK)
    }

    /// Dispatches due `elapsed` into the run, counting the one at t = 0.
    pub fn due_dispatches(elapsed: Duration, rate: f64) -> u64 {
        ((elapsed.as_secs_f64() * rate + SCHEDULE_EPSILON).floor() as u64).saturating_add(1)
    }

    /// Dispatches that come due within one tick of `period` at `rate`.
    ///
    /// The bucket must hold at least this many permits, or a tick would drop
    /// part of its own burst while the pool sits idle.
    pub fn tick_burst(rate: f64, period: Duration) -> usize {
        ((rate * period.as_secs_f64() - SCHEDULE_EPSILON).ceil() as usize).max(1)
    }

    /// Splits `owed` dispatches into the ones that fit in the bucket and the
    /// ones that are dropped.
    ///
    /// Returns `(granted, dropped)`.
    pub fn grant_dispatches(owed: u64, available: usize, capacity: usize) -> (usize, u64) {
        let free = capacity.saturating_sub(available);
        let granted = owed.min(free as u64) as usize;
        (granted, owed - granted as u64)
    }

    /// Adds dispatch permits on a fixed-rate schedule anchored at `started_at`
    /// until shutdown.
    ///
    /// At most `capacity` permits are stored, or one tick's burst when that is
    /// larger.
    ///
    /// Returns the number of dispatches dropped because the bucket was full.
    pub async fn scheduler_task(
        ctx: ExecutionContext,
        rate: f64,
        capacity: usize,
        started_at: Instant,
    ) -> u64 {
        let ExecutionContext {
            mut shutdown,
            tokens,
        } = ctx;
        let period = dispatch_period(rate);
        let capacity = capacity
            .max(tick_burst(rate, period))
            .min(Semaphore::MAX_PERMITS);
        let mut ticker = time::interval_at(started_at, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut accounted = 0u64;
        let mut dropped = 0u64;
        tracing::debug!("Scheduler started at {rate}/s, ticking every {period:?}.");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {
                    let due = due_dispatches(started_at.elapsed(), rate);
                    let owed = due.saturating_sub(accounted);
                    accounted = accounted.max(due);

                    let (granted, excess) =
                        grant_dispatches(owed, tokens.available_permits(), capacity);
                    if granted > 0 {
                        tokens.add_permits(granted);
                    }
                    if excess > 0 {
                        dropped += excess;
                        tracing::trace!("Dispatch queue full, dropped {excess} dispatches.");
                    }
                }
            }
        }

        tracing::debug!("Scheduler stopped, {dropped} dispatches dropped.");
        dropped
    }

    /// Spawns `workers` Tokio tasks, each one a member of the pool.
    ///
    /// A worker only checks for shutdown while waiting for a dispatch; an
    /// invocation that has started always runs to completion.
    pub fn spawn_workers<F, Fut>(
        ctx: ExecutionContext,
        workers: usize,
        action: F,
        records: mpsc::Sender<TaskRecord>,
    ) -> Vec<JoinHandle<()>>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Outcome,
    {
        (0..workers)
            .map(|i| {
                let ExecutionContext {
                    mut shutdown,
                    tokens,
                } = ctx.clone();
                let action = action.clone();
                let records = records.clone();

                tokio::spawn(async move {
                    tracing::debug!("Worker {i} started.");
                    loop {
                        let permit = tokio::select! {
                            biased;
                            _ = shutdown.wait_for(|stop| *stop) => break,
                            permit = tokens.acquire() => match permit {
                                Ok(p) => p,
                                Err(_) => {
                                    tracing::debug!("Worker {i} found the dispatch queue closed.");
                                    break;
                                }
                            },
                        };
                        // The scheduler alone hands out permits.
                        permit.forget();

                        let start = Instant::now();
                        let outcome = action().await;
                        let record = TaskRecord::new(start, start.elapsed(), outcome.is_failure());

                        if records.send(record).await.is_err() {
                            break;
                        }
                    }
                    tracing::debug!("Worker {i} shutting down.");
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn spawn_expected_number_of_workers() {
        let n = 10;
        let (ctx, _shutdown) = ExecutionContext::new();
        let (tx, _rx) = mpsc::channel(1);
        let workers = spawn_workers(ctx, n, || async {}, tx);

        assert_eq!(workers.len(), n);
    }

    #[tokio::test]
    async fn workers_run_once_per_permit() {
        let (ctx, shutdown) = ExecutionContext::new();
        let (tx, mut rx) = mpsc::channel(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let workers = spawn_workers(
            ctx.clone(),
            3,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
            tx,
        );

        ctx.tokens.add_permits(5);
        for _ in 0..5 {
            let record = rx.recv().await.unwrap();
            assert!(!record.failed);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        shutdown.send_replace(true);
        for w in workers {
            w.await.unwrap();
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failures_are_recorded() {
        let (ctx, _shutdown) = ExecutionContext::new();
        let (tx, mut rx) = mpsc::channel(4);
        let _workers = spawn_workers(ctx.clone(), 1, || async { Err::<(), _>("refused") }, tx);

        ctx.tokens.add_permits(1);
        assert!(rx.recv().await.unwrap().failed);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_invocation_survives_shutdown() {
        let (ctx, shutdown) = ExecutionContext::new();
        let (tx, mut rx) = mpsc::channel(4);
        let workers = spawn_workers(
            ctx.clone(),
            1,
            || async { time::sleep(Duration::from_millis(50)).await },
            tx,
        );

        ctx.tokens.add_permits(1);
        time::sleep(Duration::from_millis(10)).await;
        shutdown.send_replace(true);
        ctx.tokens.close();

        let record = rx.recv().await.unwrap();
        assert!(record.duration >= Duration::from_millis(50));
        for w in workers {
            w.await.unwrap();
        }
    }

    #[tokio::test]
    async fn idle_workers_exit_when_queue_closes() {
        let (ctx, _shutdown) = ExecutionContext::new();
        let (tx, _rx) = mpsc::channel(1);
        let workers = spawn_workers(ctx.clone(), 4, || async {}, tx);

        ctx.tokens.close();
        for w in workers {
            w.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_grants_one_permit_per_period() {
        let (ctx, shutdown) = ExecutionContext::new();
        let started_at = Instant::now();
        let scheduler = tokio::spawn(scheduler_task(ctx.clone(), 10.0, 1_000, started_at));

        time::sleep(Duration::from_millis(1_050)).await;
        // t = 0, 100, ..., 1000 ms
        assert_eq!(ctx.tokens.available_permits(), 11);

        shutdown.send_replace(true);
        assert_eq!(scheduler.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_drops_what_does_not_fit() {
        let (ctx, shutdown) = ExecutionContext::new();
        let started_at = Instant::now();
        // No worker ever takes a permit: the pool is saturated throughout.
        let scheduler = tokio::spawn(scheduler_task(ctx.clone(), 100.0, 3, started_at));

        time::sleep(Duration::from_millis(995)).await;
        assert_eq!(ctx.tokens.available_permits(), 3);

        shutdown.send_replace(true);
        // 100 due in the first second, 3 stored.
        assert_eq!(scheduler.await.unwrap(), 97);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_bucket_keeps_one_tick_burst() {
        let (ctx, shutdown) = ExecutionContext::new();
        let started_at = Instant::now();
        let scheduler = tokio::spawn(scheduler_task(ctx.clone(), 20_000.0, 2, started_at));

        time::sleep(Duration::from_millis(10)).await;
        // 20 due per 1ms tick, more than the configured capacity of 2.
        assert_eq!(ctx.tokens.available_permits(), 20);

        shutdown.send_replace(true);
        assert!(scheduler.await.unwrap() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pool_takes_every_dispatch_above_timer_resolution() {
        let (ctx, shutdown) = ExecutionContext::new();
        let (tx, mut rx) = mpsc::channel(64);
        let workers = spawn_workers(ctx.clone(), 2, || async {}, tx);
        let received = tokio::spawn(async move {
            let mut n = 0u64;
            while rx.recv().await.is_some() {
                n += 1;
            }
            n
        });

        let started_at = Instant::now();
        let scheduler = tokio::spawn(scheduler_task(ctx.clone(), 20_000.0, 2, started_at));
        time::sleep(Duration::from_millis(100)).await;

        shutdown.send_replace(true);
        ctx.tokens.close();
        assert_eq!(scheduler.await.unwrap(), 0);
        for w in workers {
            w.await.unwrap();
        }
        // t = 0 plus 20 per tick, the tick at 100ms may race the shutdown.
        let received = received.await.unwrap();
        assert!((1_981..=2_001).contains(&received), "received {received}");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_stops_on_shutdown() {
        let (ctx, shutdown) = ExecutionContext::new();
        let scheduler = tokio::spawn(scheduler_task(ctx.clone(), 5.0, 100, Instant::now()));

        time::sleep(Duration::from_millis(10)).await;
        shutdown.send_replace(true);
        scheduler.await.unwrap();

        let granted = ctx.tokens.available_permits();
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ctx.tokens.available_permits(), granted);
    }

    mod due_dispatches {
        use super::*;

        #[test]
        fn first_dispatch_at_start() {
            assert_eq!(due_dispatches(Duration::ZERO, 5.0), 1);
        }

        #[test]
        fn steady_rate() {
            for secs in 1..10 {
                assert_eq!(
                    due_dispatches(Duration::from_secs(secs), 100.0),
                    secs * 100 + 1
                );
            }
        }

        #[test]
        fn fractional_rate_rounds_down() {
            assert_eq!(due_dispatches(Duration::from_secs(1), 2.5), 3);
            assert_eq!(due_dispatches(Duration::from_secs(2), 2.5), 6);
        }

        #[test]
        fn tick_on_dispatch_instant_counts_it() {
            // 1/3 s does not divide evenly into nanoseconds.
            let period = dispatch_period(3.0);
            for k in 1..30u32 {
                assert_eq!(due_dispatches(period * k, 3.0), k as u64 + 1);
            }
        }

        #[test]
        fn extreme_values_saturate() {
            assert_eq!(due_dispatches(Duration::MAX, f64::MAX), u64::MAX);
        }
    }

    mod tick_burst {
        use super::*;

        #[test]
        fn one_per_tick_below_timer_resolution() {
            assert_eq!(tick_burst(100.0, dispatch_period(100.0)), 1);
            assert_eq!(tick_burst(3.0, dispatch_period(3.0)), 1);
            assert_eq!(tick_burst(0.1, dispatch_period(0.1)), 1);
        }

        #[test]
        fn several_per_tick_above_timer_resolution() {
            assert_eq!(tick_burst(20_000.0, MIN_TICK), 20);
            assert_eq!(tick_burst(2_500.0, MIN_TICK), 3);
        }
    }

    mod grant_dispatches {
        use super::*;

        #[test]
        fn grants_everything_that_fits() {
            assert_eq!(grant_dispatches(2, 0, 8), (2, 0));
        }

        #[test]
        fn drops_the_excess() {
            assert_eq!(grant_dispatches(10, 5, 8), (3, 7));
        }

        #[test]
        fn full_bucket_drops_all() {
            assert_eq!(grant_dispatches(4, 8, 8), (0, 4));
            assert_eq!(grant_dispatches(4, 9, 8), (0, 4));
        }

        #[test]
        fn nothing_owed() {
            assert_eq!(grant_dispatches(0, 0, 8), (0, 0));
        }
    }

    mod dispatch_period {
        use super::*;

        #[test]
        fn inverse_of_rate() {
            assert_eq!(dispatch_period(5.0), Duration::from_millis(200));
            assert_eq!(dispatch_period(100.0), Duration::from_millis(10));
        }

        #[test]
        fn clamped_to_timer_resolution() {
            assert_eq!(dispatch_period(100_000.0), MIN_TICK);
        }

        #[test]
        fn slow_rates_still_tick_every_second() {
            assert_eq!(dispatch_period(0.1), MAX_TICK);
            assert_eq!(dispatch_period(f64::MIN_POSITIVE), MAX_TICK);
        }
    }
}
