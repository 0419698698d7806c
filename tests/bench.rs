use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use pacebench::{Bench, BenchConfig, BenchError, FnHostMetrics, MetricsTable};

fn config(rate: f64, duration_ms: u64, workers: usize) -> BenchConfig {
    BenchConfig::builder()
        .rate(rate)
        .duration(Duration::from_millis(duration_ms))
        .workers(workers)
        .title("scenario")
        .handle_interrupt(false)
        .build()
}

fn bench(config: BenchConfig) -> Bench {
    Bench::new(config)
        .unwrap()
        .with_host_metrics(Arc::new(FnHostMetrics::new(|| Ok(20.0), || Ok(45.0))))
}

fn assert_accounted(table: &MetricsTable) {
    assert_eq!(table.total_qps() + table.discarded, table.completed);
    for (_, w) in table.iter() {
        assert!((0.0..=1.0).contains(&w.error_rate));
        assert!(w.errors() <= w.qps);
        assert!(w.p50 <= w.p90 && w.p90 <= w.p99);
    }
}

#[tokio::test(start_paused = true)]
async fn steady_rate_closes_only_settled_seconds() {
    let table = bench(config(5.0, 2_000, 2))
        .run(|| async { tokio::time::sleep(Duration::from_millis(10)).await })
        .await
        .unwrap();

    assert_eq!(table.title, "scenario");
    assert!(!table.tracks_errors);
    assert_eq!(table.windows.keys().copied().collect::<Vec<_>>(), vec![0]);

    let w = table.get(0).unwrap();
    assert_eq!(w.qps, 5);
    assert!(w.average >= Duration::from_millis(10));
    assert!(w.average < Duration::from_millis(12));
    assert_eq!(w.error_rate, 0.0);
    assert_eq!((w.cpu, w.memory), (20.0, 45.0));
    assert!(table.discarded > 0);
    assert_accounted(&table);
}

#[tokio::test(start_paused = true)]
async fn failures_show_up_in_error_rate() {
    let calls = Arc::new(AtomicU64::new(0));
    let table = bench(config(100.0, 2_000, 4))
        .run(move || {
            let calls = calls.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                if calls.fetch_add(1, Ordering::Relaxed) % 10 < 3 {
                    Err("unlucky")
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

    assert!(table.tracks_errors);
    let w = table.get(0).unwrap();
    assert!((95..=105).contains(&w.qps), "qps {}", w.qps);
    assert!((0.25..=0.35).contains(&w.error_rate), "error rate {}", w.error_rate);
    assert_accounted(&table);
}

#[tokio::test(start_paused = true)]
async fn one_window_per_closed_second() {
    let table = bench(config(20.0, 3_500, 2))
        .run(|| async {})
        .await
        .unwrap();

    assert_eq!(table.windows.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    for (_, w) in table.iter() {
        assert_eq!(w.qps, 20);
    }
    assert_accounted(&table);
}

#[tokio::test(start_paused = true)]
async fn rate_above_timer_resolution_is_met_by_small_pool() {
    let table = bench(config(10_000.0, 2_000, 2))
        .run(|| async {})
        .await
        .unwrap();

    let w = table.get(0).unwrap();
    assert!((9_700..=10_300).contains(&w.qps), "qps {}", w.qps);
    assert_accounted(&table);
}

#[tokio::test(start_paused = true)]
async fn saturated_pool_lowers_achieved_rate() {
    let mut config = config(100.0, 2_000, 1);
    config.dispatch_capacity = Some(1);

    let table = bench(config)
        .run(|| async { tokio::time::sleep(Duration::from_millis(50)).await })
        .await
        .unwrap();

    let w = table.get(0).unwrap();
    assert!((15..=21).contains(&w.qps), "qps {}", w.qps);
    assert!(w.p99 >= Duration::from_millis(50));
    assert_accounted(&table);
}

#[tokio::test(start_paused = true)]
async fn run_shorter_than_a_second_has_no_windows() {
    let table = bench(config(50.0, 900, 2))
        .run(|| async {})
        .await
        .unwrap();

    assert!(table.is_empty());
    assert_eq!(table.discarded, table.completed);
}

#[test]
fn invalid_settings_are_refused() {
    let zero_rate = BenchConfig::builder().rate(0.0).build();
    assert!(matches!(Bench::new(zero_rate), Err(BenchError::InvalidRate(_))));

    let nan_rate = BenchConfig::builder().rate(f64::NAN).build();
    assert!(matches!(Bench::new(nan_rate), Err(BenchError::InvalidRate(_))));

    let no_workers = BenchConfig::builder().rate(1.0).workers(0).build();
    assert!(matches!(Bench::new(no_workers), Err(BenchError::InvalidWorkers)));
}
