use parking_lot::Mutex;
use sysinfo::System;

use crate::error::HostMetricsError;

/// Source of host utilization figures attached to every closed window.
///
/// Implementations should be cheap: they are called by the analyzer once per
/// second, outside the bucket lock.
pub trait HostMetrics: Send + Sync {
    /// Host CPU utilization in percent.
    fn cpu_percent(&self) -> Result<f64, HostMetricsError>;

    /// Host memory utilization in percent.
    fn memory_percent(&self) -> Result<f64, HostMetricsError>;
}

/// Host metrics read through `sysinfo`.
///
/// CPU usage is the average across all cores since the previous call, so the
/// first reading of a run is usually 0.
pub struct SystemHostMetrics {
    system: Mutex<System>,
}

impl SystemHostMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemHostMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetrics for SystemHostMetrics {
    fn cpu_percent(&self) -> Result<f64, HostMetricsError> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        if system.cpus().is_empty() {
            return Err(HostMetricsError::Unavailable("cpu"));
        }
        Ok(system.global_cpu_usage() as f64)
    }

    fn memory_percent(&self) -> Result<f64, HostMetricsError> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(HostMetricsError::Unavailable("memory"));
        }
        Ok(system.used_memory() as f64 / total as f64 * 100.0)
    }
}

/// Host metrics backed by two plain functions.
///
/// # Example
/// ```rust
/// use pacebench::{FnHostMetrics, HostMetrics};
///
/// let host = FnHostMetrics::new(|| Ok(25.0), || Ok(50.0));
/// assert_eq!(host.cpu_percent().unwrap(), 25.0);
/// ```
pub struct FnHostMetrics<C, M> {
    cpu: C,
    memory: M,
}

impl<C, M> FnHostMetrics<C, M>
where
    C: Fn() -> Result<f64, HostMetricsError> + Send + Sync,
    M: Fn() -> Result<f64, HostMetricsError> + Send + Sync,
{
    pub fn new(cpu: C, memory: M) -> Self {
        Self { cpu, memory }
    }
}

impl<C, M> HostMetrics for FnHostMetrics<C, M>
where
    C: Fn() -> Result<f64, HostMetricsError> + Send + Sync,
    M: Fn() -> Result<f64, HostMetricsError> + Send + Sync,
{
    fn cpu_percent(&self) -> Result<f64, HostMetricsError> {
        (self.cpu)()
    }

    fn memory_percent(&self) -> Result<f64, HostMetricsError> {
        (self.memory)()
    }
}

/// Reads both figures, substituting 0 for any that fails.
pub(crate) fn sample(host: &dyn HostMetrics) -> (f64, f64) {
    let cpu = host.cpu_percent().unwrap_or_else(|e| {
        tracing::warn!("Failed to sample host cpu: {e}");
        0.0
    });
    let memory = host.memory_percent().unwrap_or_else(|e| {
        tracing::warn!("Failed to sample host memory: {e}");
        0.0
    });
    (cpu, memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_become_zero() {
        let host = FnHostMetrics::new(
            || Err(HostMetricsError::Unavailable("cpu")),
            || Ok(61.5),
        );
        assert_eq!(sample(&host), (0.0, 61.5));
    }

    #[test]
    fn system_metrics_are_percentages() {
        let host = SystemHostMetrics::new();
        if let Ok(memory) = host.memory_percent() {
            assert!((0.0..=100.0).contains(&memory));
        }
        if let Ok(cpu) = host.cpu_percent() {
            assert!(cpu >= 0.0);
        }
    }
}
