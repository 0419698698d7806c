use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Only configuration errors are fatal to a run, and they are raised before
/// anything is started. Failures of the benchmarked function are data, not
/// errors, and never show up here.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid rate {0}: expected a finite number of invocations per second greater than zero")]
    InvalidRate(f64),

    #[error("invalid run duration: must be greater than zero")]
    InvalidDuration,

    #[error("invalid worker count: at least one worker is required")]
    InvalidWorkers,

    #[error("invalid dispatch capacity: at least one pending dispatch must fit")]
    InvalidDispatchCapacity,

    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to read a host utilization figure.
///
/// The analyzer never propagates it: the figure is replaced by 0 and a
/// warning is logged.
#[derive(Debug, Error)]
pub enum HostMetricsError {
    #[error("{0} usage is unavailable")]
    Unavailable(&'static str),
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
