//! poll-engine: periodic register polling with debounced writes
//!
//! A [`PollingEngine`] owns one device connection. Its [`PollCoordinator`]
//! sweeps the register catalog on an interval and publishes immutable
//! [`Snapshot`]s; its [`WriteScheduler`] coalesces bursts of edits per register
//! into a single write, checked against the latest value before it is sent.
//! Both share a [`SharedLink`], so requests never interleave on the wire.

mod config;
pub use config::EngineConfig;

mod error;
pub use error::{CycleError, EngineError};

mod metrics;
pub use metrics::{EngineMetrics, MetricsHub};

mod link;
pub use link::SharedLink;

mod snapshot;
pub use snapshot::{Snapshot, SnapshotRecord, SnapshotStore};

mod equality;
pub use equality::values_equal;

mod scheduler;
pub use scheduler::{CurrentValue, RefreshTrigger, ScheduleOutcome, WriteEvent, WriteScheduler};

mod coordinator;
pub use coordinator::{CycleOutcome, PollCoordinator, PollState};

mod engine;
pub use engine::PollingEngine;
