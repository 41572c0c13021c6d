//! Hub coordinator: one entry point per inbound event.
//!
//! # Locking
//!
//! - `gate` (RwLock): ingest, join, leave and rename hold it shared;
//!   store-reset holds it exclusively.
//! - per-identity lanes: ingest holds its identity's lane; rename holds
//!   both endpoints' lanes, acquired in name order.
//! - cycle lock (inside the aggregator): rename and reset wait for an
//!   in-flight cycle, a new trigger arriving mid-cycle is dropped.
//!
//! Acquisition order is always gate, lanes, cycle lock, then the
//! registry/baseline/clock mutexes. Aggregation takes only the cycle lock
//! and the registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, warn};

use crate::aggregator::{CycleReport, WindowedAggregator};
use crate::baseline::{BaselineTracker, Phase};
use crate::config::AggregationConfig;
use crate::error::{AggregateError, Error, RegistryError, Result};
use crate::events::{Command, EventBus, HubEvent, Presence};
use crate::experiment::{ExperimentClock, Marker, SegmentReport};
use crate::reassociation::{Reassociation, reassociate};
use crate::registry::{IdentityRegistry, IdentityState};
use crate::sample::Sample;
use crate::store::SampleLogStore;

pub struct Hub<S> {
    store: Arc<S>,
    registry: Arc<Mutex<IdentityRegistry>>,
    aggregator: WindowedAggregator<S>,
    baseline: Mutex<BaselineTracker>,
    experiment: Mutex<ExperimentClock>,
    events: EventBus,
    gate: RwLock<()>,
    lanes: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    interval: Option<Duration>,
}

impl<S: SampleLogStore> Hub<S> {
    pub fn new(store: Arc<S>, aggregation: &AggregationConfig, events: EventBus) -> Self {
        let registry = Arc::new(Mutex::new(IdentityRegistry::new()));
        let aggregator = WindowedAggregator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            aggregation.fan_in_timeout(),
        );
        Self {
            store,
            registry,
            aggregator,
            baseline: Mutex::new(BaselineTracker::new()),
            experiment: Mutex::new(ExperimentClock::new()),
            events,
            gate: RwLock::new(()),
            lanes: std::sync::Mutex::new(HashMap::new()),
            interval: aggregation.interval(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    fn lane(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lanes.entry(identity.to_string()).or_default())
    }

    /// Append a sample and feed the baseline if it is recording.
    ///
    /// Returns the identity's new log length.
    pub async fn ingest(
        &self,
        identity: &str,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        if identity.is_empty() {
            return Err(RegistryError::EmptyIdentity.into());
        }
        if !value.is_finite() {
            return Err(Error::InvalidSample(format!(
                "{identity}: value {value} is not finite"
            )));
        }
        let sample = Sample::new(identity, value, timestamp.unwrap_or_else(Utc::now));

        let _gate = self.gate.read().await;
        let lane = self.lane(identity);
        let _lane = lane.lock().await;

        let length = self.store.append(identity, &sample).await?;
        {
            let mut registry = self.registry.lock().await;
            registry.register(identity)?;
            registry.set_length(identity, length)?;
        }
        self.baseline.lock().await.ingest(value);
        debug!(identity, value, length, "sample recorded");

        self.events.publish(HubEvent::SampleRecorded {
            identity: sample.identity,
            value,
            timestamp: sample.timestamp,
        });
        Ok(length)
    }

    /// Announce a producer, reassociating from `previous` first when given.
    pub async fn join(&self, identity: &str, previous: Option<&str>) -> Result<()> {
        if identity.is_empty() {
            return Err(RegistryError::EmptyIdentity.into());
        }
        if let Some(previous) = previous.filter(|p| !p.is_empty() && *p != identity) {
            self.rename(previous, identity).await?;
        }
        {
            let _gate = self.gate.read().await;
            let mut registry = self.registry.lock().await;
            registry.register(identity)?;
            registry.set_live(identity, true)?;
        }
        info!(identity, "identity joined");
        self.events.publish(HubEvent::PresenceChanged {
            identity: identity.to_string(),
            event: Presence::Joined,
        });
        Ok(())
    }

    /// Mark a producer disconnected. Its log and cursor are kept.
    pub async fn leave(&self, identity: &str) -> Result<()> {
        {
            let _gate = self.gate.read().await;
            let mut registry = self.registry.lock().await;
            if !registry.contains(identity) {
                debug!(identity, "leave for unknown identity ignored");
                return Ok(());
            }
            registry.set_live(identity, false)?;
        }
        info!(identity, "identity left");
        self.events.publish(HubEvent::PresenceChanged {
            identity: identity.to_string(),
            event: Presence::Left,
        });
        Ok(())
    }

    /// Reassociate `old` into `new`, sequenced against ingestion on both.
    pub async fn rename(&self, old: &str, new: &str) -> Result<Reassociation> {
        if old.is_empty() || new.is_empty() {
            return Err(RegistryError::EmptyIdentity.into());
        }
        let span = crate::hub_span!("reassociate", old_identity = old, new_identity = new);
        async {
            let _gate = self.gate.read().await;
            let (first, second) = if old <= new { (old, new) } else { (new, old) };
            let first_lane = self.lane(first);
            let _first = first_lane.lock().await;
            let second_lane = (first != second).then(|| self.lane(second));
            let _second = match &second_lane {
                Some(lane) => Some(lane.lock().await),
                None => None,
            };
            let _cycle = self.aggregator.quiesce().await;

            let outcome = reassociate(&*self.store, &self.registry, old, new).await?;
            if old != new {
                self.lanes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(old);
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    pub async fn baseline_start(&self) -> Result<()> {
        self.baseline.lock().await.start()?;
        Ok(())
    }

    /// Finish recording and publish the resulting baseline.
    pub async fn baseline_end(&self) -> Result<Option<f64>> {
        let mean = self.baseline.lock().await.end()?;
        self.events.publish(HubEvent::BaselineValue { mean });
        Ok(mean)
    }

    pub async fn baseline_reset(&self) {
        self.baseline.lock().await.reset();
        info!("baseline reset");
    }

    /// Publish and return the current baseline (`None` when unavailable).
    pub async fn baseline_query(&self) -> Option<f64> {
        let mean = self.baseline.lock().await.current();
        self.events.publish(HubEvent::BaselineValue { mean });
        mean
    }

    pub async fn baseline_phase(&self) -> Phase {
        self.baseline.lock().await.phase()
    }

    /// Run one aggregation cycle and publish its outcome.
    ///
    /// A dropped overlapping trigger publishes nothing; any other failure
    /// publishes `cycle-failed`. Cursors only move on success.
    pub async fn trigger_aggregation(&self) -> std::result::Result<CycleReport, AggregateError> {
        match self.aggregator.run_cycle().await {
            Ok(report) => {
                self.events
                    .publish(HubEvent::AggregateResult(report.aggregate.clone()));
                Ok(report)
            }
            Err(AggregateError::InProgress) => Err(AggregateError::InProgress),
            Err(err) => {
                warn!(
                    reason = err.reason(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "aggregation cycle failed"
                );
                self.events.publish(HubEvent::CycleFailed {
                    reason: err.reason().to_string(),
                    detail: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Drop every log, identity, baseline value and experiment marker.
    pub async fn store_reset(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        let _cycle = self.aggregator.quiesce().await;

        self.store.clear().await?;
        self.registry.lock().await.clear();
        self.baseline.lock().await.reset();
        self.experiment.lock().await.clear();
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("store reset");
        Ok(())
    }

    /// Record an experiment marker at the current instant.
    pub async fn mark(&self, marker: Marker) -> DateTime<Utc> {
        let at = Utc::now();
        self.experiment.lock().await.mark(marker, at);
        info!(marker = marker.as_str(), %at, "experiment marker");
        at
    }

    /// Summarise `identity`'s log against the experiment markers.
    pub async fn report(&self, identity: &str) -> Result<SegmentReport> {
        let samples = self.store.read_range(identity, 0, -1).await?;
        let report = self.experiment.lock().await.report(&samples);
        info!(
            identity,
            samples = samples.len(),
            before = report.before.count,
            during = report.during.count,
            after = report.after.count,
            "identity report"
        );
        self.events.publish(HubEvent::IdentityReport {
            identity: identity.to_string(),
            report,
        });
        Ok(report)
    }

    pub async fn identity_state(&self, identity: &str) -> Option<IdentityState> {
        self.registry.lock().await.state_of(identity)
    }

    pub async fn identities(&self) -> Vec<String> {
        self.registry
            .lock()
            .await
            .all_identities()
            .map(str::to_string)
            .collect()
    }

    pub async fn live_identities(&self) -> Vec<String> {
        self.registry
            .lock()
            .await
            .live_identities()
            .map(str::to_string)
            .collect()
    }

    /// Dispatch one inbound event.
    ///
    /// Aggregation failures are recovered here (published, never returned).
    pub async fn handle(&self, command: Command) -> Result<()> {
        debug!(command = command.kind(), "handling command");
        if let Some(marker) = command.marker() {
            self.mark(marker).await;
            return Ok(());
        }
        match command {
            Command::SampleIngest {
                identity,
                value,
                timestamp,
            } => {
                self.ingest(&identity, value, timestamp).await?;
            }
            Command::IdentityJoin { identity, previous } => {
                self.join(&identity, previous.as_deref()).await?;
            }
            Command::IdentityLeave { identity } => self.leave(&identity).await?,
            Command::IdentityRename {
                old_identity,
                new_identity,
            } => {
                self.rename(&old_identity, &new_identity).await?;
            }
            Command::IdentityReport { identity } => {
                self.report(&identity).await?;
            }
            Command::BaselineStart => self.baseline_start().await?,
            Command::BaselineEnd => {
                self.baseline_end().await?;
            }
            Command::BaselineReset => self.baseline_reset().await,
            Command::BaselineQuery => {
                self.baseline_query().await;
            }
            Command::AggregationTrigger => {
                let _ = self.trigger_aggregation().await;
            }
            Command::StoreReset => self.store_reset().await?,
            Command::ExperimentBegin
            | Command::PerformanceBegin
            | Command::PerformanceEnd
            | Command::ExperimentEnd => {}
        }
        Ok(())
    }

    /// Trigger aggregation every configured interval until `shutdown` flips.
    ///
    /// With no interval configured this only waits for shutdown.
    pub async fn run_periodic(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(period) = self.interval else {
            debug!("periodic aggregation disabled");
            let _ = shutdown.wait_for(|stop| *stop).await;
            return;
        };
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = period.as_millis() as u64, "periodic aggregation started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.trigger_aggregation().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("periodic aggregation shutting down");
                        break;
                    }
                }
            }
        }
    }
}
