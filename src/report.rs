use std::{collections::BTreeMap, future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::Result, percentile::Summary};

/// Immutable summary of one elapsed second of a run.
///
/// Created once by the analyzer when the second is closed and never touched
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsWindow {
    pub average: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
    /// Completed invocations attributed to this second.
    pub qps: u64,
    /// Failed fraction of `qps`, always 0 when error tracking is disabled.
    pub error_rate: f64,
    /// Host CPU utilization (percent) sampled when the window was closed.
    pub cpu: f64,
    /// Host memory utilization (percent) sampled when the window was closed.
    pub memory: f64,
}

impl MetricsWindow {
    pub fn new(summary: Summary, cpu: f64, memory: f64) -> Self {
        Self {
            average: summary.average,
            p50: summary.p50,
            p90: summary.p90,
            p99: summary.p99,
            qps: summary.qps,
            error_rate: summary.error_rate,
            cpu,
            memory,
        }
    }

    /// Number of failed invocations in this window.
    pub fn errors(&self) -> u64 {
        (self.error_rate * self.qps as f64).round() as u64
    }
}

/// The outcome of a run: one [`MetricsWindow`] per closed second, keyed by
/// the second's offset from the start of the run.
///
/// The trailing second that was still open when the run stopped is never
/// part of the table; its records are only counted in `discarded`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable {
    pub title: String,
    /// Whether the benchmarked action could report failures.
    pub tracks_errors: bool,
    pub windows: BTreeMap<u64, MetricsWindow>,
    /// Records received by the collector.
    pub completed: u64,
    /// Records still waiting in the bucket when the run stopped.
    pub discarded: u64,
}

impl MetricsTable {
    pub fn new(title: impl Into<String>, tracks_errors: bool) -> Self {
        Self {
            title: title.into(),
            tracks_errors,
            ..Default::default()
        }
    }

    pub fn get(&self, second: u64) -> Option<&MetricsWindow> {
        self.windows.get(&second)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Windows in second order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &MetricsWindow)> {
        self.windows.iter().map(|(k, v)| (*k, v))
    }

    /// Invocations accounted for in closed windows.
    pub fn total_qps(&self) -> u64 {
        self.windows.values().map(|w| w.qps).sum()
    }

    pub(crate) fn insert(&mut self, second: u64, window: MetricsWindow) {
        self.windows.insert(second, window);
    }
}

/// A [`Reporter`] hands a finished [`MetricsTable`] to something that presents
/// it: a terminal, a file, a chart server.
///
/// The engine itself does no presentation. Reporters only ever see a table
/// after the run has stopped, so they can read it freely.
///
/// # Example
/// ```rust
/// use pacebench::{MetricsTable, Reporter, Result};
///
/// struct CountReporter;
///
/// impl Reporter for CountReporter {
///     async fn report(&self, table: &MetricsTable) -> Result<()> {
///         println!("{} windows", table.len());
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter {
    fn report(&self, table: &MetricsTable) -> impl Future<Output = Result<()>>;
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use std::io::Write as _;

    use super::*;

    fn micros(d: Duration) -> u128 {
        d.as_micros()
    }

    /// Prints one row per window to stdout, latencies in microseconds.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct StdoutReporter;

    impl StdoutReporter {
        pub fn render(&self, table: &MetricsTable) -> String {
            let mut out = String::new();
            if !table.title.is_empty() {
                let underline = "=".repeat(table.title.chars().count());
                out.push_str(&format!("{}\n{underline}\n", table.title));
            }

            out.push_str(&format!(
                "{:>6} {:>10} {:>10} {:>10} {:>10} {:>8}",
                "time", "avg(us)", "p50(us)", "p90(us)", "p99(us)", "qps"
            ));
            if table.tracks_errors {
                out.push_str(&format!(" {:>8}", "err(%)"));
            }
            out.push_str(&format!(" {:>7} {:>7}\n", "cpu(%)", "mem(%)"));

            for (second, w) in table.iter() {
                out.push_str(&format!(
                    "{:>5}s {:>10} {:>10} {:>10} {:>10} {:>8}",
                    second,
                    micros(w.average),
                    micros(w.p50),
                    micros(w.p90),
                    micros(w.p99),
                    w.qps
                ));
                if table.tracks_errors {
                    out.push_str(&format!(" {:>8.2}", w.error_rate * 100.0));
                }
                out.push_str(&format!(" {:>7.1} {:>7.1}\n", w.cpu, w.memory));
            }

            out.push_str(&format!(
                "{} windows, {} invocations ({} discarded from the trailing second)\n",
                table.len(),
                table.completed,
                table.discarded
            ));
            out
        }
    }

    impl Reporter for StdoutReporter {
        async fn report(&self, table: &MetricsTable) -> Result<()> {
            let rendered = self.render(table);
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }

    /// Writes the whole table as JSON to stdout.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct JsonReporter {
        pub pretty: bool,
    }

    impl JsonReporter {
        pub fn render(&self, table: &MetricsTable) -> Result<String> {
            let json = if self.pretty {
                serde_json::to_string_pretty(table)?
            } else {
                serde_json::to_string(table)?
            };
            Ok(json)
        }
    }

    impl Reporter for JsonReporter {
        async fn report(&self, table: &MetricsTable) -> Result<()> {
            let json = self.render(table)?;
            println!("{json}");
            Ok(())
        }
    }
}
