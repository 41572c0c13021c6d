//! heartbeat-core: Core library for heartbeat
//!
//! Ingests heart-rate samples from many concurrently connected identities,
//! keeps one append-only log per identity, and periodically reduces the most
//! recent samples common to every active identity to a per-offset mean and
//! population variance for live display.
//!
//! # Architecture
//!
//! ```text
//! Command ─▶ Hub ─▶ Sample Log Store (memory / SQLite)
//!             │            ▲
//!             │            │ fan-out range reads
//!             ├─▶ Windowed Aggregator ─▶ Identity Registry
//!             ├─▶ Reassociation
//!             ├─▶ Baseline Tracker / Experiment Clock
//!             ▼
//!         Event Bus ─▶ subscribers
//! ```
//!
//! # Modules
//!
//! - `store`: per-identity sample log capability and backends
//! - `registry`: read cursors and log lengths
//! - `aggregator`: windowed cross-identity aggregation cycles
//! - `reassociation`: identity rename with history migration
//! - `baseline`: idle / recording / computed baseline phases
//! - `experiment`: experiment markers and segment reports
//! - `events`: inbound commands, outbound events, broadcast bus
//! - `hub`: coordinator and lock ordering
//! - `config`, `logging`, `error`: ambient plumbing
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod baseline;
pub mod config;
pub mod error;
pub mod events;
pub mod experiment;
pub mod hub;
pub mod logging;
pub mod reassociation;
pub mod registry;
pub mod sample;
pub mod stats;
pub mod store;

pub use aggregator::{CycleReport, WindowAggregate, WindowedAggregator};
pub use baseline::{BaselineTracker, Phase};
pub use config::Config;
pub use error::{AggregateError, Error, Result};
pub use events::{Command, EventBus, HubEvent, Presence};
pub use hub::Hub;
pub use registry::{IdentityRegistry, IdentityState};
pub use sample::Sample;
pub use store::{MemoryLogStore, SampleLogStore, SqliteLogStore};

/// Version of the heartbeat-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
