//! Baseline phase tracker.
//!
//! ```text
//!   idle ──start──▶ recording ──end──▶ computed
//!    ▲                                     │
//!    └──────────────reset (any)────────────┤
//!                 computed ──start──▶ recording
//! ```
//!
//! Values only accumulate while recording. An empty recording finalises to
//! "no baseline" rather than a NaN mean.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PhaseError;
use crate::stats::Moments;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Recording,
    Computed,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Computed => "computed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct BaselineTracker {
    phase: Phase,
    accumulator: Vec<f64>,
    mean: Option<f64>,
}

impl BaselineTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Begin a fresh recording from `idle` or `computed`.
    ///
    /// The accumulator is cleared; a previously computed mean stays visible
    /// through [`current`](Self::current) until the new recording ends.
    pub fn start(&mut self) -> Result<(), PhaseError> {
        match self.phase {
            from @ (Phase::Idle | Phase::Computed) => {
                self.accumulator.clear();
                self.phase = Phase::Recording;
                info!(%from, "baseline recording started");
                Ok(())
            }
            Phase::Recording => Err(PhaseError::InvalidTransition {
                action: "start",
                phase: self.phase.as_str(),
            }),
        }
    }

    /// Feed a value. Returns whether it was accumulated.
    pub fn ingest(&mut self, value: f64) -> bool {
        if self.phase != Phase::Recording {
            return false;
        }
        self.accumulator.push(value);
        debug!(value, collected = self.accumulator.len(), "baseline value");
        true
    }

    /// Finish recording and compute the mean over the accumulator.
    pub fn end(&mut self) -> Result<Option<f64>, PhaseError> {
        if self.phase != Phase::Recording {
            return Err(PhaseError::InvalidTransition {
                action: "end",
                phase: self.phase.as_str(),
            });
        }
        let moments: Moments = self.accumulator.iter().copied().collect();
        self.mean = moments.mean();
        self.phase = Phase::Computed;
        info!(
            samples = moments.count(),
            mean = ?self.mean,
            "baseline computed"
        );
        Ok(self.mean)
    }

    /// Back to `idle` from any phase, forgetting values and mean.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.accumulator.clear();
        self.mean = None;
    }

    /// Last computed mean, or `None` when unavailable.
    #[must_use]
    pub fn current(&self) -> Option<f64> {
        self.mean
    }

    #[must_use]
    pub fn collected(&self) -> &[f64] {
        &self.accumulator
    }
}
