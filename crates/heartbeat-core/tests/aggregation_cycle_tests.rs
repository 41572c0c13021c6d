//! End-to-end hub scenarios: windowing, reassociation, reset, baseline.
//!
//! Every scenario runs against both store backends where the backend matters.

use std::sync::Arc;
use std::time::Duration;

use heartbeat_core::config::AggregationConfig;
use heartbeat_core::events::{Command, EventBus, HubEvent};
use heartbeat_core::experiment::SegmentStats;
use heartbeat_core::{AggregateError, Hub, MemoryLogStore, Phase, SampleLogStore, SqliteLogStore};
use tempfile::TempDir;
use tokio::sync::broadcast;

// =============================================================================
// Helpers
// =============================================================================

fn config() -> AggregationConfig {
    AggregationConfig {
        interval_ms: 0,
        fan_in_timeout_ms: 1_000,
    }
}

fn memory_hub() -> Hub<MemoryLogStore> {
    Hub::new(Arc::new(MemoryLogStore::new()), &config(), EventBus::new(256))
}

fn sqlite_hub(dir: &TempDir) -> Hub<SqliteLogStore> {
    let store = SqliteLogStore::open(&dir.path().join("heartbeat.db")).unwrap();
    Hub::new(Arc::new(store), &config(), EventBus::new(256))
}

async fn feed<S: SampleLogStore>(hub: &Hub<S>, identity: &str, values: &[f64]) {
    for v in values {
        hub.ingest(identity, *v, None).await.unwrap();
    }
}

fn drain(rx: &mut broadcast::Receiver<HubEvent>) -> Vec<HubEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn aggregates(events: &[HubEvent]) -> Vec<&heartbeat_core::WindowAggregate> {
    events
        .iter()
        .filter_map(|e| match e {
            HubEvent::AggregateResult(agg) => Some(agg),
            _ => None,
        })
        .collect()
}

async fn pending<S: SampleLogStore>(hub: &Hub<S>, identity: &str) -> u64 {
    hub.identity_state(identity).await.unwrap().pending()
}

// =============================================================================
// Windowing
// =============================================================================

async fn window_floors_to_smallest_pending<S: SampleLogStore>(hub: Hub<S>) {
    feed(&hub, "a", &[1.0, 2.0, 3.0, 4.0, 5.0]).await;
    feed(&hub, "b", &[10.0, 20.0, 30.0]).await;
    feed(&hub, "c", &[100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0]).await;

    let report = hub.trigger_aggregation().await.unwrap();
    assert_eq!(report.window_size, 3);
    assert_eq!(report.identities, vec!["a", "b", "c"]);
    assert_eq!(report.aggregate.raw.len(), 3);
    assert!(report.aggregate.raw.iter().all(|col| col.len() == 3));
    assert_eq!(report.aggregate.raw[0], vec![3.0, 10.0, 500.0]);
    assert_eq!(report.aggregate.raw[2], vec![5.0, 30.0, 700.0]);

    for id in ["a", "b", "c"] {
        assert_eq!(hub.identity_state(id).await.unwrap().cursor, 3);
    }
    assert_eq!(pending(&hub, "a").await, 2);
    assert_eq!(pending(&hub, "b").await, 0);
    assert_eq!(pending(&hub, "c").await, 4);

    let next = hub.trigger_aggregation().await.unwrap();
    assert_eq!(next.window_size, 2);
    assert_eq!(next.identities, vec!["a", "c"]);
    assert_eq!(pending(&hub, "a").await, 0);
    assert_eq!(pending(&hub, "c").await, 2);
}

#[tokio::test]
async fn window_floors_to_smallest_pending_memory() {
    window_floors_to_smallest_pending(memory_hub()).await;
}

#[tokio::test]
async fn window_floors_to_smallest_pending_sqlite() {
    let dir = TempDir::new().unwrap();
    window_floors_to_smallest_pending(sqlite_hub(&dir)).await;
}

#[tokio::test]
async fn aggregate_result_carries_population_variance() {
    let hub = memory_hub();
    let mut rx = hub.subscribe();
    feed(&hub, "a", &[2.0]).await;
    feed(&hub, "b", &[4.0]).await;
    feed(&hub, "c", &[6.0]).await;

    hub.handle(Command::AggregationTrigger).await.unwrap();

    let events = drain(&mut rx);
    let results = aggregates(&events);
    assert_eq!(results.len(), 1);
    assert!((results[0].average[0] - 4.0).abs() < 1e-9);
    assert!((results[0].variance[0] - 8.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn no_pending_data_emits_empty_result_and_keeps_cursors() {
    let hub = memory_hub();
    feed(&hub, "a", &[70.0]).await;
    hub.trigger_aggregation().await.unwrap();

    let mut rx = hub.subscribe();
    let report = hub.trigger_aggregation().await.unwrap();
    assert_eq!(report.window_size, 0);
    assert_eq!(hub.identity_state("a").await.unwrap().cursor, 1);

    let events = drain(&mut rx);
    let results = aggregates(&events);
    assert_eq!(results.len(), 1);
    assert!(results[0].average.is_empty());
    assert!(results[0].variance.is_empty());
    assert!(results[0].raw.is_empty());
}

#[tokio::test]
async fn samples_arriving_after_snapshot_wait_for_next_cycle() {
    let hub = memory_hub();
    feed(&hub, "a", &[1.0, 2.0]).await;
    hub.trigger_aggregation().await.unwrap();
    feed(&hub, "a", &[3.0]).await;
    let report = hub.trigger_aggregation().await.unwrap();
    assert_eq!(report.aggregate.raw, vec![vec![3.0]]);
}

#[tokio::test]
async fn overlapping_trigger_is_dropped_without_emission() {
    let hub = Arc::new(memory_hub());
    feed(&hub, "a", &[1.0]).await;
    let mut rx = hub.subscribe();

    let (first, second) = tokio::join!(hub.trigger_aggregation(), hub.trigger_aggregation());
    let outcomes = [first, second];
    let dropped = outcomes
        .iter()
        .filter(|r| matches!(r, Err(AggregateError::InProgress)))
        .count();
    let completed = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(completed + dropped, 2);
    assert!(completed >= 1);

    let events = drain(&mut rx);
    assert_eq!(aggregates(&events).len(), completed);
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, HubEvent::CycleFailed { .. }))
    );
}

// =============================================================================
// Reassociation
// =============================================================================

async fn rename_migrates_history<S: SampleLogStore>(hub: Hub<S>) {
    feed(&hub, "a", &[60.0, 61.0, 62.0]).await;
    let outcome = hub.rename("a", "b").await.unwrap();
    assert_eq!(outcome.length, 3);

    let migrated = hub.store().read_range("b", 0, -1).await.unwrap();
    let values: Vec<f64> = migrated.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![60.0, 61.0, 62.0]);
    assert!(migrated.iter().all(|s| s.identity == "b"));
    assert!(hub.identity_state("a").await.is_none());
    assert_eq!(hub.identities().await, vec!["b"]);
    assert_eq!(hub.store().len("a").await.unwrap(), 0);

    hub.ingest("b", 63.0, None).await.unwrap();
    assert_eq!(hub.identity_state("b").await.unwrap().length, 4);
}

#[tokio::test]
async fn rename_migrates_history_memory() {
    rename_migrates_history(memory_hub()).await;
}

#[tokio::test]
async fn rename_migrates_history_sqlite() {
    let dir = TempDir::new().unwrap();
    rename_migrates_history(sqlite_hub(&dir)).await;
}

#[tokio::test]
async fn rename_into_existing_identity_appends_after_destination() {
    let hub = memory_hub();
    feed(&hub, "b", &[1.0, 2.0]).await;
    hub.trigger_aggregation().await.unwrap();
    feed(&hub, "a", &[3.0]).await;

    let outcome = hub.rename("a", "b").await.unwrap();
    assert!(outcome.merged);
    assert_eq!((outcome.length, outcome.cursor), (3, 2));

    let report = hub.trigger_aggregation().await.unwrap();
    assert_eq!(report.identities, vec!["b"]);
    assert_eq!(report.aggregate.raw, vec![vec![3.0]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_and_rename_lose_nothing() {
    let hub = Arc::new(memory_hub());
    feed(&hub, "a", &[0.0; 5]).await;

    let writers: Vec<_> = (0..20_i32)
        .map(|i| {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.ingest("a", f64::from(i), None).await.unwrap() })
        })
        .collect();
    let renamer = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.rename("a", "b").await.unwrap() })
    };
    for writer in writers {
        writer.await.unwrap();
    }
    renamer.await.unwrap();

    let in_a = hub.store().len("a").await.unwrap();
    let in_b = hub.store().len("b").await.unwrap();
    assert_eq!(in_a + in_b, 25);
    assert_eq!(hub.identity_state("b").await.unwrap().length, in_b);
    if in_a > 0 {
        assert_eq!(hub.identity_state("a").await.unwrap().length, in_a);
    }
}

#[tokio::test]
async fn empty_rename_target_is_rejected() {
    let hub = memory_hub();
    feed(&hub, "a", &[1.0]).await;
    assert!(hub.rename("a", "").await.is_err());
    assert_eq!(hub.identity_state("a").await.unwrap().length, 1);
}

// =============================================================================
// Reset
// =============================================================================

#[tokio::test]
async fn store_reset_forgets_everything() {
    let hub = memory_hub();
    feed(&hub, "a", &[1.0, 2.0]).await;
    hub.baseline_start().await.unwrap();
    feed(&hub, "b", &[3.0]).await;
    hub.trigger_aggregation().await.unwrap();

    hub.handle(Command::StoreReset).await.unwrap();

    assert!(hub.identities().await.is_empty());
    assert_eq!(hub.store().len("a").await.unwrap(), 0);
    assert_eq!(hub.baseline_phase().await, Phase::Idle);
    assert_eq!(hub.baseline_query().await, None);

    assert_eq!(hub.ingest("a", 9.0, None).await.unwrap(), 1);
    let state = hub.identity_state("a").await.unwrap();
    assert_eq!((state.cursor, state.length), (0, 1));
}

// =============================================================================
// Baseline
// =============================================================================

#[tokio::test]
async fn baseline_averages_only_recorded_samples() {
    let hub = memory_hub();
    let mut rx = hub.subscribe();
    feed(&hub, "a", &[100.0]).await;

    hub.handle(Command::BaselineStart).await.unwrap();
    feed(&hub, "a", &[60.0]).await;
    feed(&hub, "b", &[70.0]).await;
    hub.handle(Command::BaselineEnd).await.unwrap();
    feed(&hub, "a", &[200.0]).await;

    assert_eq!(hub.baseline_query().await, Some(65.0));
    let baselines: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            HubEvent::BaselineValue { mean } => Some(mean),
            _ => None,
        })
        .collect();
    assert_eq!(baselines, vec![Some(65.0), Some(65.0)]);
}

#[tokio::test]
async fn baseline_end_without_start_is_an_error() {
    let hub = memory_hub();
    assert!(hub.handle(Command::BaselineEnd).await.is_err());
    assert_eq!(hub.baseline_query().await, None);
}

// =============================================================================
// Experiment report
// =============================================================================

#[tokio::test]
async fn report_splits_log_by_markers() {
    let hub = memory_hub();
    feed(&hub, "p1", &[60.0, 62.0]).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    hub.handle(Command::ExperimentBegin).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    feed(&hub, "p1", &[90.0]).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    hub.handle(Command::PerformanceEnd).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    feed(&hub, "p1", &[70.0]).await;

    let report = hub.report("p1").await.unwrap();
    assert_eq!(report.before, SegmentStats { count: 2, mean: Some(61) });
    assert_eq!(report.during, SegmentStats { count: 1, mean: Some(90) });
    assert_eq!(report.after, SegmentStats { count: 1, mean: Some(70) });
}
