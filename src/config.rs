use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{BenchError, Result};

const DEFAULT_HOST: &str = "localhost";
/// Below this many CPUs no core is kept back for window analysis.
const MIN_CPUS_TO_RESERVE_FOR_ANALYSIS: usize = 4;

/// Number of workers used when none is configured.
///
/// One per available CPU, keeping one back for the analyzer on machines with
/// four or more, so that computing a window does not show up in the measured
/// latencies.
pub fn default_pool_size() -> usize {
    let cpus = num_cpus::get();
    if cpus >= MIN_CPUS_TO_RESERVE_FOR_ANALYSIS {
        cpus - 1
    } else {
        cpus
    }
}

fn default_settle() -> Duration {
    Duration::from_millis(200)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

/// Everything a [`crate::Bench`] needs to know before it starts.
///
/// ```rust
/// use std::time::Duration;
/// use pacebench::BenchConfig;
///
/// let config = BenchConfig::builder()
///     .rate(500.0)
///     .duration(Duration::from_secs(30))
///     .title("login")
///     .build();
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.listen_addr(), "localhost:0");
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Target invocations per second.
    pub rate: f64,
    /// How long to run. `None` runs until stopped.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub duration: Option<Duration>,
    /// Passed through to reporters.
    #[builder(default, setter(into))]
    #[serde(default)]
    pub title: String,
    /// Address a chart renderer should listen on.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub host: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub port: u16,
    /// Size of the worker pool.
    #[builder(default = default_pool_size())]
    #[serde(default = "default_pool_size")]
    pub workers: usize,
    /// Dispatches allowed to wait for a free worker. Defaults to `workers`,
    /// and never less than one scheduler tick's worth of dispatches.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub dispatch_capacity: Option<usize>,
    /// Grace after a second boundary before that second is closed.
    #[builder(default = default_settle())]
    #[serde(default = "default_settle")]
    pub settle: Duration,
    /// Stop the run on Ctrl-C.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub handle_interrupt: bool,
    /// How long to wait for in-flight invocations once the run stops.
    #[builder(default = default_drain_timeout())]
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

impl BenchConfig {
    /// Rejects settings that would make the run meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(BenchError::InvalidRate(self.rate));
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(BenchError::InvalidDuration);
        }
        if self.workers == 0 {
            return Err(BenchError::InvalidWorkers);
        }
        if self.dispatch_capacity == Some(0) {
            return Err(BenchError::InvalidDispatchCapacity);
        }
        Ok(())
    }

    pub fn dispatch_capacity(&self) -> usize {
        self.dispatch_capacity.unwrap_or(self.workers)
    }

    /// `host:port` for a renderer, `localhost` when no host is set.
    pub fn listen_addr(&self) -> String {
        let host = match self.host.as_deref() {
            Some(h) if !h.is_empty() => h,
            _ => DEFAULT_HOST,
        };
        format!("{host}:{}", self.port)
    }
}
