mod common;

use std::sync::Arc;
use std::time::Duration;

use outbox_relay::{
    application::handlers::scheduler::{RelayScheduler, SourceState},
    domain::models::SourceDescriptor,
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use common::{Harness, row, source};

fn scheduler(
    harness: &Harness,
    sources: &[&SourceDescriptor],
    grace: Duration,
) -> Arc<RelayScheduler> {
    Arc::new(RelayScheduler::new(
        sources.iter().map(|source| harness.poller(source)).collect(),
        harness.metrics.clone(),
        grace,
    ))
}

#[tokio::test(start_paused = true)]
async fn slow_cycle_skips_ticks_and_counts_overlaps() {
    let mut orders = source("orders");
    orders.poll_interval = Duration::from_secs(1);
    let harness = Harness::new(&[&orders]);
    harness.database.set_read_delay(Some(Duration::from_millis(2500))).await;
    let scheduler = scheduler(&harness, &[&orders], Duration::from_secs(10));

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    // Ticks at 0s, 1s and 2s: the first starts a cycle that runs until 2.5s.
    sleep(Duration::from_millis(2200)).await;
    let slot = scheduler.slot(&orders.key()).unwrap();
    assert_eq!(slot.state(), SourceState::Running);
    assert_eq!(slot.overlaps(), 2);
    let diagnostics = scheduler.diagnostics();
    assert_eq!(diagnostics[0].source, orders.key());
    assert_eq!(diagnostics[0].state, SourceState::Running);
    assert_eq!(diagnostics[0].overlaps, 2);
    assert_eq!(
        harness
            .metrics
            .cycle_overlaps
            .with_label_values(&["orders.outbox"])
            .get(),
        2
    );

    shutdown.cancel();
    run.await.unwrap();
    assert_eq!(
        harness
            .metrics
            .poll_cycles
            .with_label_values(&["orders.outbox", "success"])
            .get(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn each_source_runs_on_its_own_timer() {
    let mut fast = source("fast");
    fast.poll_interval = Duration::from_millis(100);
    let mut slow = source("slow");
    slow.poll_interval = Duration::from_secs(1);
    let harness = Harness::new(&[&fast, &slow]);
    let scheduler = scheduler(&harness, &[&fast, &slow], Duration::from_secs(1));

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });
    sleep(Duration::from_millis(950)).await;
    shutdown.cancel();
    run.await.unwrap();

    let cycles = |key: &str| {
        harness
            .metrics
            .poll_cycles
            .with_label_values(&[key, "success"])
            .get()
    };
    assert_eq!(cycles("slow.outbox"), 1);
    assert!(cycles("fast.outbox") >= 9);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_in_flight_cycle_finish_within_grace() {
    let orders = source("orders");
    let harness = Harness::new(&[&orders]);
    harness.insert(&orders, vec![row("r1", 0)]).await;
    harness.database.set_read_delay(Some(Duration::from_secs(2))).await;
    let scheduler = scheduler(&harness, &[&orders], Duration::from_secs(10));

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });
    sleep(Duration::from_millis(500)).await;
    shutdown.cancel();
    run.await.unwrap();

    assert!(harness.database.pending_ids(&orders.key()).await.is_empty());
    assert!(harness.tracker.last_success(&orders.key()).await.is_some());
    assert_eq!(
        scheduler.slot(&orders.key()).unwrap().state(),
        SourceState::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_cycles_that_outlive_the_grace_period() {
    let orders = source("orders");
    let harness = Harness::new(&[&orders]);
    harness.insert(&orders, vec![row("r1", 0)]).await;
    harness.database.set_read_delay(Some(Duration::from_secs(60))).await;
    let scheduler = scheduler(&harness, &[&orders], Duration::from_secs(1));

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });
    sleep(Duration::from_millis(100)).await;
    let cancelled_at = Instant::now();
    shutdown.cancel();
    run.await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    assert_eq!(harness.bus.attempts().await, 0);
    assert_eq!(harness.database.pending_ids(&orders.key()).await.len(), 1);
    assert_eq!(harness.tracker.last_success(&orders.key()).await, None);
}
