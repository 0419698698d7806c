//! Executor: pacing and running the benchmarked action.
//!
//! Two roles live here, connected by a token bucket:
//!
//! - the **scheduler** ticks on a fixed-rate schedule and adds one dispatch
//!   token per invocation that has come due,
//! - the **worker pool** is a fixed number of tasks that each take a token,
//!   run the action once, time it and hand a [`crate::TaskRecord`] to the
//!   collector.
//!
//! The bucket is a [`tokio::sync::Semaphore`] whose stored permits are capped
//! at the dispatch capacity, raised to one tick's worth of dispatches at
//! rates above the timer resolution. When every worker is busy, due
//! dispatches wait in the bucket; when the bucket is full, further dispatches
//! are dropped.
//! Overload therefore shows up as a lower achieved rate, never as unbounded
//! concurrency or an unbounded queue.
//!
//! # Pacing
//!
//! The scheduler does not count ticks. On every tick it computes how many
//! dispatches are due since the start of the run,
//!
//! ```text
//! due(t) = floor(t * rate) + 1
//! ```
//!
//! and grants the difference to what it already accounted for. A late tick
//! catches up, a skipped tick is coalesced into the next one, and the long
//! term rate stays anchored to the original schedule. The tick period is
//! `1s / rate`, floored at one millisecond (the timer resolution); at higher
//! rates several dispatches are granted per tick.
pub mod rate;
