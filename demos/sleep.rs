use std::time::Duration;

use clap::Parser;
use pacebench::{Bench, BenchConfig, Reporter, StdoutReporter};
use tracing_subscriber::EnvFilter;

/// Benchmarks a function that sleeps for a random 0-100ms.
#[derive(Parser, Debug)]
struct Args {
    /// Invocations per second
    #[arg(short, long, default_value_t = 50.0)]
    rate: f64,

    /// Run length in seconds, runs until Ctrl-C when omitted
    #[arg(short, long)]
    duration: Option<u64>,

    #[arg(short, long, default_value = "random sleep")]
    title: String,

    /// Print the table as JSON instead
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> pacebench::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let config = BenchConfig::builder()
        .rate(args.rate)
        .title(args.title)
        .build();
    let config = BenchConfig {
        duration: args.duration.map(Duration::from_secs),
        ..config
    };

    let table = Bench::new(config)?
        .run(|| async {
            let ms = rand::random_range(0..100);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        })
        .await?;

    if args.json {
        pacebench::JsonReporter { pretty: true }.report(&table).await
    } else {
        StdoutReporter.report(&table).await
    }
}
