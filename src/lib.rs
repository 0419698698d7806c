//! Pacebench: a fixed-rate load generator for async Rust functions.
//!
//! You hand pacebench an async function and a target rate. It invokes the
//! function at that rate from a bounded pool of workers, times every
//! invocation, and every second condenses the last full second into a row
//! of latency percentiles, achieved throughput, error rate and host
//! utilization. The finished [`MetricsTable`] is handed to a [`Reporter`].
//!
//! # Architecture
//!
//! A run is made of a few long-lived Tokio tasks:
//!
//! - the **scheduler** adds dispatch tokens on a schedule anchored at the start
//!   of the run, so late ticks catch up and the long-term rate holds,
//! - the **worker pool** takes tokens, runs the function and sends a
//!   [`TaskRecord`] for every invocation,
//! - the **collector** appends those records to the [`ActiveBucket`],
//! - the **analyzer** closes each second once it has settled, estimating its
//!   percentiles with a nested top-k selection rather than a full sort.
//!
//! [`Bench`] wires them together and owns the lifecycle: it stops on the
//! configured duration, on a [`StopHandle`] or on Ctrl-C, and lets in-flight
//! invocations finish before returning.
//!
//! If the pool cannot keep up, due dispatches wait in a bounded queue and are
//! dropped once it is full. Overload shows up as a lower `qps`, never as an
//! unbounded number of concurrent invocations.
//!
//! # Feature flags
//! - `builtins` (default): [`StdoutReporter`] and [`JsonReporter`]
//! - `internals`: expose the scheduler and worker pool primitives
//!
//! # Where to start
//!
//! Build a [`BenchConfig`], pass it to [`Bench::new`] and await [`Bench::run`].
//! Whether failures are tracked depends on what your function returns, see
//! [`Outcome`].

/// The shared bucket of records awaiting analysis
pub mod aggregate;
/// Closing one-second windows
pub mod analyzer;
/// Run lifecycle
pub mod bench;
/// Draining worker records into the bucket
pub mod collector;
/// Run settings
pub mod config;
pub mod error;
/// Pacing and the worker pool
pub mod executor;
/// Host CPU and memory sampling
pub mod host;
/// Per-invocation records
pub mod metric;
/// Latency percentile estimation
pub mod percentile;
/// The metrics table and reporters
pub mod report;

pub use aggregate::{ActiveBucket, SharedBucket};
pub use bench::{Bench, StopHandle, StopReason};
pub use config::{BenchConfig, default_pool_size};
pub use error::{BenchError, HostMetricsError, Result};
pub use host::{FnHostMetrics, HostMetrics, SystemHostMetrics};
pub use metric::{Outcome, TaskRecord};
pub use percentile::{Summary, TopK};
pub use report::{MetricsTable, MetricsWindow, Reporter};

#[cfg(feature = "builtins")]
pub use report::{JsonReporter, StdoutReporter};
