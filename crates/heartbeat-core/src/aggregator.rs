//! Windowed cross-identity aggregation.
//!
//! A cycle takes every identity with unread samples, floors the window to the
//! smallest pending count, reads each candidate's trailing window in
//! parallel, and reduces position `i` across identities to a mean and a
//! population variance. Cursors move forward by the window size only after
//! every reply has arrived intact.
//!
//! # Fan-in
//!
//! Reads are driven through a [`FuturesUnordered`] under one deadline
//! (`aggregation.fan_in_timeout_ms`). Each reply is either samples or a store
//! error, so a failed read can never be mistaken for an empty one. Any
//! failure abandons the cycle with the registry untouched.
//!
//! # Serialisation
//!
//! At most one cycle runs at a time. A trigger that arrives mid-cycle gets
//! [`AggregateError::InProgress`] and is dropped. Reassociation and reset
//! hold [`WindowedAggregator::quiesce`] so they never interleave with the
//! fan-in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use crate::error::{AggregateError, RegistryError};
use crate::registry::{IdentityRegistry, PendingWindow};
use crate::sample::Sample;
use crate::stats::Moments;
use crate::store::SampleLogStore;

/// Per-offset reduction of one window. All three vectors have the window's
/// length; `raw[i]` has one entry per candidate, in candidate order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub average: Vec<f64>,
    pub variance: Vec<f64>,
    pub raw: Vec<Vec<f64>>,
}

impl WindowAggregate {
    /// Reduce aligned columns.
    #[must_use]
    pub fn from_columns(raw: Vec<Vec<f64>>) -> Self {
        let mut average = Vec::with_capacity(raw.len());
        let mut variance = Vec::with_capacity(raw.len());
        for column in &raw {
            let moments: Moments = column.iter().copied().collect();
            average.push(moments.mean().unwrap_or_default());
            variance.push(moments.population_variance().unwrap_or_default());
        }
        Self {
            average,
            variance,
            raw,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Outcome of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// Candidates in column order
    pub identities: Vec<String>,
    pub window_size: u64,
    pub aggregate: WindowAggregate,
}

pub struct WindowedAggregator<S> {
    store: Arc<S>,
    registry: Arc<Mutex<IdentityRegistry>>,
    fan_in_timeout: Duration,
    cycle_lock: Mutex<()>,
    cycles: AtomicU64,
}

impl<S: SampleLogStore> WindowedAggregator<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<Mutex<IdentityRegistry>>,
        fan_in_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            fan_in_timeout,
            cycle_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
        }
    }

    /// Wait for any in-flight cycle and block new ones while the guard lives.
    pub async fn quiesce(&self) -> MutexGuard<'_, ()> {
        self.cycle_lock.lock().await
    }

    /// Cycles started so far, including failed ones.
    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Run one aggregation cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, AggregateError> {
        let Ok(_cycle_guard) = self.cycle_lock.try_lock() else {
            debug!("aggregation trigger dropped, cycle in flight");
            return Err(AggregateError::InProgress);
        };
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        let candidates = self.registry.lock().await.pending();
        let Some(window) = candidates.iter().map(PendingWindow::pending).min() else {
            debug!(cycle, "no pending samples");
            return Ok(CycleReport {
                cycle,
                identities: Vec::new(),
                window_size: 0,
                aggregate: WindowAggregate::default(),
            });
        };

        let span = crate::hub_span!(
            "aggregate",
            cycle = cycle,
            window_size = window,
            candidates = candidates.len()
        );
        async {
            let replies = self.fan_out(&candidates, window).await?;
            let columns = align_columns(&replies, window);
            self.advance_cursors(&candidates, window).await?;

            let report = CycleReport {
                cycle,
                identities: candidates.into_iter().map(|c| c.identity).collect(),
                window_size: window,
                aggregate: WindowAggregate::from_columns(columns),
            };
            info!("aggregation cycle complete");
            Ok::<_, AggregateError>(report)
        }
        .instrument(span)
        .await
    }

    /// Read each candidate's trailing `window` samples concurrently.
    ///
    /// Bounds are absolute positions taken from the length snapshot, so
    /// appends landing mid-cycle do not shift the window.
    async fn fan_out(
        &self,
        candidates: &[PendingWindow],
        window: u64,
    ) -> Result<Vec<Vec<Sample>>, AggregateError> {
        let store = &*self.store;
        let mut fetches: FuturesUnordered<_> = candidates
            .iter()
            .enumerate()
            .map(|(slot, candidate)| {
                let start = (candidate.length - window) as i64;
                let end = candidate.length as i64 - 1;
                async move {
                    let reply = store.read_range(&candidate.identity, start, end).await;
                    (slot, reply)
                }
            })
            .collect();

        let deadline = Instant::now() + self.fan_in_timeout;
        let mut replies: Vec<Option<Vec<Sample>>> = vec![None; candidates.len()];
        let mut received = 0usize;

        while received < candidates.len() {
            match tokio::time::timeout_at(deadline, fetches.next()).await {
                Ok(Some((slot, Ok(samples)))) => {
                    let actual = samples.len() as u64;
                    if actual != window {
                        let identity = candidates[slot].identity.clone();
                        warn!(%identity, expected = window, actual, "short range reply");
                        return Err(AggregateError::ShortReply {
                            identity,
                            expected: window,
                            actual,
                        });
                    }
                    replies[slot] = Some(samples);
                    received += 1;
                }
                Ok(Some((slot, Err(source)))) => {
                    let identity = candidates[slot].identity.clone();
                    warn!(%identity, error = %source, "range read failed");
                    return Err(AggregateError::Store { identity, source });
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        expected = candidates.len(),
                        received, "fan-in deadline passed"
                    );
                    return Err(AggregateError::FanInTimeout {
                        expected: candidates.len(),
                        received,
                    });
                }
            }
        }

        Ok(replies.into_iter().flatten().collect())
    }

    async fn advance_cursors(
        &self,
        candidates: &[PendingWindow],
        window: u64,
    ) -> Result<(), AggregateError> {
        let mut registry = self.registry.lock().await;
        if let Some(gone) = candidates.iter().find(|c| !registry.contains(&c.identity)) {
            return Err(RegistryError::UnknownIdentity(gone.identity.clone()).into());
        }
        for candidate in candidates {
            registry.advance_cursor(&candidate.identity, window)?;
        }
        Ok(())
    }
}

/// Zip replies by position: `raw[i]` holds sample `i` of every reply.
fn align_columns(replies: &[Vec<Sample>], window: u64) -> Vec<Vec<f64>> {
    (0..window as usize)
        .map(|i| replies.iter().map(|reply| reply[i].value).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryLogStore, StoreBackendKind};
    use chrono::Utc;

    async fn seeded(entries: &[(&str, &[f64])]) -> (Arc<MemoryLogStore>, Arc<Mutex<IdentityRegistry>>) {
        let store = Arc::new(MemoryLogStore::new());
        let registry = Arc::new(Mutex::new(IdentityRegistry::new()));
        for (identity, values) in entries {
            let mut reg = registry.lock().await;
            reg.register(identity).unwrap();
            for v in *values {
                let len = store
                    .append(identity, &Sample::new(*identity, *v, Utc::now()))
                    .await
                    .unwrap();
                reg.set_length(identity, len).unwrap();
            }
        }
        (store, registry)
    }

    fn aggregator<S: SampleLogStore>(
        store: Arc<S>,
        registry: Arc<Mutex<IdentityRegistry>>,
    ) -> WindowedAggregator<S> {
        WindowedAggregator::new(store, registry, Duration::from_secs(5))
    }

    #[test]
    fn columns_reduce_to_mean_and_population_variance() {
        let agg = WindowAggregate::from_columns(vec![vec![2.0, 4.0, 6.0]]);
        assert!((agg.average[0] - 4.0).abs() < 1e-9);
        assert!((agg.variance[0] - 8.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn single_column_across_three_identities() {
        let (store, registry) = seeded(&[("a", &[2.0]), ("b", &[4.0]), ("c", &[6.0])]).await;
        let report = aggregator(store, registry).run_cycle().await.unwrap();
        assert_eq!(report.window_size, 1);
        assert_eq!(report.aggregate.raw, vec![vec![2.0, 4.0, 6.0]]);
        assert!((report.aggregate.variance[0] - 8.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn window_reads_the_trailing_samples() {
        let (store, registry) =
            seeded(&[("a", &[1.0, 2.0, 3.0]), ("b", &[10.0, 20.0])]).await;
        let report = aggregator(store, registry).run_cycle().await.unwrap();
        assert_eq!(report.identities, vec!["a", "b"]);
        assert_eq!(report.aggregate.raw, vec![vec![2.0, 10.0], vec![3.0, 20.0]]);
    }

    #[tokio::test]
    async fn empty_registry_emits_empty_aggregate() {
        let (store, registry) = seeded(&[]).await;
        let report = aggregator(store, registry).run_cycle().await.unwrap();
        assert_eq!(report.window_size, 0);
        assert!(report.aggregate.is_empty());
        assert!(report.aggregate.average.is_empty());
    }

    #[tokio::test]
    async fn quiesced_aggregator_drops_triggers() {
        let (store, registry) = seeded(&[("a", &[1.0])]).await;
        let agg = aggregator(store, Arc::clone(&registry));
        let guard = agg.quiesce().await;
        assert!(matches!(
            agg.run_cycle().await,
            Err(AggregateError::InProgress)
        ));
        drop(guard);
        assert_eq!(registry.lock().await.cursor_of("a"), Some(0));
        assert_eq!(agg.run_cycle().await.unwrap().window_size, 1);
    }

    /// Store whose reads misbehave in a chosen way.
    struct FaultyStore {
        fault: Fault,
    }

    enum Fault {
        Error,
        Short,
        Hang,
    }

    impl SampleLogStore for FaultyStore {
        fn backend_kind(&self) -> StoreBackendKind {
            StoreBackendKind::Memory
        }

        async fn append(&self, _identity: &str, _sample: &Sample) -> Result<u64, StoreError> {
            Ok(1)
        }

        async fn read_range(
            &self,
            identity: &str,
            _start: i64,
            _end: i64,
        ) -> Result<Vec<Sample>, StoreError> {
            match self.fault {
                Fault::Error => Err(StoreError::Unavailable("offline".to_string())),
                Fault::Short => Ok(vec![Sample::new(identity, 1.0, Utc::now())]),
                Fault::Hang => std::future::pending().await,
            }
        }

        async fn len(&self, _identity: &str) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn rename(&self, _old: &str, _new: &str) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn clear(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    async fn faulty(fault: Fault) -> (WindowedAggregator<FaultyStore>, Arc<Mutex<IdentityRegistry>>) {
        let registry = Arc::new(Mutex::new(IdentityRegistry::new()));
        {
            let mut reg = registry.lock().await;
            reg.register("a").unwrap();
            reg.set_length("a", 3).unwrap();
        }
        let agg = WindowedAggregator::new(
            Arc::new(FaultyStore { fault }),
            Arc::clone(&registry),
            Duration::from_millis(250),
        );
        (agg, registry)
    }

    #[tokio::test]
    async fn store_error_leaves_cursors_alone() {
        let (agg, registry) = faulty(Fault::Error).await;
        let err = agg.run_cycle().await.unwrap_err();
        assert!(matches!(err, AggregateError::Store { ref identity, .. } if identity == "a"));
        assert_eq!(registry.lock().await.cursor_of("a"), Some(0));
    }

    #[tokio::test]
    async fn short_reply_fails_cycle() {
        let (agg, registry) = faulty(Fault::Short).await;
        let err = agg.run_cycle().await.unwrap_err();
        assert!(matches!(
            err,
            AggregateError::ShortReply {
                expected: 3,
                actual: 1,
                ..
            }
        ));
        assert_eq!(registry.lock().await.cursor_of("a"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_read_hits_fan_in_deadline() {
        let (agg, registry) = faulty(Fault::Hang).await;
        let err = agg.run_cycle().await.unwrap_err();
        assert!(matches!(
            err,
            AggregateError::FanInTimeout {
                expected: 1,
                received: 0
            }
        ));
        assert_eq!(registry.lock().await.cursor_of("a"), Some(0));
        assert_eq!(agg.cycles_started(), 1);
    }
}
