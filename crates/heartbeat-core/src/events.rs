//! Inbound commands and outbound hub events.
//!
//! Both travel as JSON objects tagged by a kebab-case `type` field, one per
//! line on the CLI transport. Outbound events fan out to every subscriber
//! through a [`tokio::sync::broadcast`] channel; a slow subscriber lags and
//! loses the oldest events instead of stalling the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::aggregator::WindowAggregate;
use crate::experiment::{Marker, SegmentReport};

/// Events consumed by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    SampleIngest {
        identity: String,
        value: f64,
        /// Defaults to the instant the hub accepts the sample
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    IdentityJoin {
        identity: String,
        /// Name the producer used before, reassociated into `identity`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<String>,
    },
    IdentityLeave {
        identity: String,
    },
    IdentityRename {
        old_identity: String,
        new_identity: String,
    },
    IdentityReport {
        identity: String,
    },
    BaselineStart,
    BaselineEnd,
    BaselineReset,
    BaselineQuery,
    AggregationTrigger,
    StoreReset,
    ExperimentBegin,
    PerformanceBegin,
    PerformanceEnd,
    ExperimentEnd,
}

impl Command {
    /// The `type` tag, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SampleIngest { .. } => "sample-ingest",
            Self::IdentityJoin { .. } => "identity-join",
            Self::IdentityLeave { .. } => "identity-leave",
            Self::IdentityRename { .. } => "identity-rename",
            Self::IdentityReport { .. } => "identity-report",
            Self::BaselineStart => "baseline-start",
            Self::BaselineEnd => "baseline-end",
            Self::BaselineReset => "baseline-reset",
            Self::BaselineQuery => "baseline-query",
            Self::AggregationTrigger => "aggregation-trigger",
            Self::StoreReset => "store-reset",
            Self::ExperimentBegin => "experiment-begin",
            Self::PerformanceBegin => "performance-begin",
            Self::PerformanceEnd => "performance-end",
            Self::ExperimentEnd => "experiment-end",
        }
    }

    /// Experiment marker carried by this command, if any.
    #[must_use]
    pub fn marker(&self) -> Option<Marker> {
        match self {
            Self::ExperimentBegin => Some(Marker::ExperimentBegin),
            Self::PerformanceBegin => Some(Marker::PerformanceBegin),
            Self::PerformanceEnd => Some(Marker::PerformanceEnd),
            Self::ExperimentEnd => Some(Marker::ExperimentEnd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Joined,
    Left,
}

/// Events produced by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HubEvent {
    AggregateResult(WindowAggregate),
    BaselineValue {
        /// `null` while no baseline is available
        mean: Option<f64>,
    },
    CycleFailed {
        reason: String,
        detail: String,
    },
    SampleRecorded {
        identity: String,
        value: f64,
        timestamp: DateTime<Utc>,
    },
    PresenceChanged {
        identity: String,
        event: Presence,
    },
    IdentityReport {
        identity: String,
        #[serde(flatten)]
        report: SegmentReport,
    },
}

impl HubEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AggregateResult(_) => "aggregate-result",
            Self::BaselineValue { .. } => "baseline-value",
            Self::CycleFailed { .. } => "cycle-failed",
            Self::SampleRecorded { .. } => "sample-recorded",
            Self::PresenceChanged { .. } => "presence-changed",
            Self::IdentityReport { .. } => "identity-report",
        }
    }
}

/// Broadcast fan-out of [`HubEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; returns how many received it.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: HubEvent) -> usize {
        let kind = event.kind();
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(event = kind, delivered, "event published");
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_parse_from_tagged_json() {
        let cmd: Command =
            serde_json::from_str(r#"{"type":"sample-ingest","identity":"p1","value":72.5}"#)
                .unwrap();
        assert_eq!(
            cmd,
            Command::SampleIngest {
                identity: "p1".to_string(),
                value: 72.5,
                timestamp: None,
            }
        );

        let cmd: Command = serde_json::from_str(
            r#"{"type":"identity-rename","old_identity":"a","new_identity":"b"}"#,
        )
        .unwrap();
        assert_eq!(cmd.kind(), "identity-rename");

        let cmd: Command = serde_json::from_str(r#"{"type":"performance-end"}"#).unwrap();
        assert_eq!(cmd.marker(), Some(Marker::PerformanceEnd));
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn aggregate_result_flattens_vectors() {
        let event = HubEvent::AggregateResult(WindowAggregate::from_columns(vec![vec![
            2.0, 4.0,
        ]]));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "aggregate-result");
        assert_eq!(value["average"], json!([3.0]));
        assert_eq!(value["variance"], json!([1.0]));
        assert_eq!(value["raw"], json!([[2.0, 4.0]]));
    }

    #[test]
    fn unavailable_baseline_serialises_as_null() {
        let value = serde_json::to_value(HubEvent::BaselineValue { mean: None }).unwrap();
        assert_eq!(value, json!({"type": "baseline-value", "mean": null}));
    }

    #[test]
    fn presence_event_shape() {
        let value = serde_json::to_value(HubEvent::PresenceChanged {
            identity: "p1".to_string(),
            event: Presence::Joined,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "presence-changed", "identity": "p1", "event": "joined"})
        );
    }

    #[tokio::test]
    async fn bus_delivers_to_every_subscriber() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish(HubEvent::BaselineValue { mean: None }), 0);

        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.publish(HubEvent::BaselineValue { mean: Some(65.0) }), 2);
        assert_eq!(
            first.recv().await.unwrap(),
            HubEvent::BaselineValue { mean: Some(65.0) }
        );
        assert_eq!(second.recv().await.unwrap().kind(), "baseline-value");
    }
}
