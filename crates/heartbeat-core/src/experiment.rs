//! Experiment lifecycle markers and per-identity segment reports.
//!
//! Four markers are recorded with the instant they arrived. Reports split
//! an identity's log into three segments:
//!
//! - `before`: earlier than experiment-begin
//! - `during`: strictly between experiment-begin and performance-end
//! - `after`: everything else, including all samples while a bounding
//!   marker is unset

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::Sample;
use crate::stats::Moments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Marker {
    ExperimentBegin,
    PerformanceBegin,
    PerformanceEnd,
    ExperimentEnd,
}

impl Marker {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExperimentBegin => "experiment-begin",
            Self::PerformanceBegin => "performance-begin",
            Self::PerformanceEnd => "performance-end",
            Self::ExperimentEnd => "experiment-end",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExperimentClock {
    pub experiment_begin: Option<DateTime<Utc>>,
    pub performance_begin: Option<DateTime<Utc>>,
    pub performance_end: Option<DateTime<Utc>>,
    pub experiment_end: Option<DateTime<Utc>>,
}

/// Count and rounded mean of one report segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub count: u64,
    /// `None` renders as "no data"
    pub mean: Option<i64>,
}

impl SegmentStats {
    fn from_values(values: &[f64]) -> Self {
        let count = values.len() as u64;
        let sum: f64 = values.iter().sum();
        let mean = if count == 0 || sum <= 0.0 {
            None
        } else {
            let moments: Moments = values.iter().copied().collect();
            moments.mean().map(|m| m.round() as i64)
        };
        Self { count, mean }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentReport {
    pub before: SegmentStats,
    pub during: SegmentStats,
    pub after: SegmentStats,
}

impl ExperimentClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `marker` at `at`, overwriting an earlier mark.
    pub fn mark(&mut self, marker: Marker, at: DateTime<Utc>) {
        let slot = match marker {
            Marker::ExperimentBegin => &mut self.experiment_begin,
            Marker::PerformanceBegin => &mut self.performance_begin,
            Marker::PerformanceEnd => &mut self.performance_end,
            Marker::ExperimentEnd => &mut self.experiment_end,
        };
        *slot = Some(at);
    }

    #[must_use]
    pub fn marked_at(&self, marker: Marker) -> Option<DateTime<Utc>> {
        match marker {
            Marker::ExperimentBegin => self.experiment_begin,
            Marker::PerformanceBegin => self.performance_begin,
            Marker::PerformanceEnd => self.performance_end,
            Marker::ExperimentEnd => self.experiment_end,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Partition `samples` by the markers and summarise each segment.
    #[must_use]
    pub fn report(&self, samples: &[Sample]) -> SegmentReport {
        let mut before = Vec::new();
        let mut during = Vec::new();
        let mut after = Vec::new();
        for sample in samples {
            let ts = sample.timestamp;
            let is_before = self.experiment_begin.is_some_and(|begin| ts < begin);
            let is_during = matches!(
                (self.experiment_begin, self.performance_end),
                (Some(begin), Some(end)) if begin < ts && ts < end
            );
            if is_before {
                before.push(sample.value);
            } else if is_during {
                during.push(sample.value);
            } else {
                after.push(sample.value);
            }
        }
        SegmentReport {
            before: SegmentStats::from_values(&before),
            during: SegmentStats::from_values(&during),
            after: SegmentStats::from_values(&after),
        }
    }
}
