use std::time::Duration;

use clap::Parser;
use pacebench::{Bench, BenchConfig, Reporter, StdoutReporter};
use tracing_subscriber::EnvFilter;

/// Benchmarks a function that fails a given share of the time.
#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long, default_value_t = 100.0)]
    rate: f64,

    /// Run length in seconds
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Probability that an invocation fails
    #[arg(short, long, default_value_t = 0.3)]
    failure_rate: f64,

    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> pacebench::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut config = BenchConfig::builder()
        .rate(args.rate)
        .duration(Duration::from_secs(args.duration))
        .title(format!("{:.0}% failures", args.failure_rate * 100.0))
        .build();
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let failure_rate = args.failure_rate;
    let table = Bench::new(config)?
        .run(move || async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if rand::random::<f64>() < failure_rate {
                Err("simulated failure")
            } else {
                Ok(())
            }
        })
        .await?;

    StdoutReporter.report(&table).await?;
    for (second, window) in table.iter().filter(|(_, w)| w.error_rate > 0.5) {
        tracing::warn!("Second {second} failed {} invocations.", window.errors());
    }
    Ok(())
}
