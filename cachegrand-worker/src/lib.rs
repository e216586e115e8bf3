//! One pinned worker OS thread: CPU affinity, a fiber scheduler hosting
//! listener and timer fibers, the worker's stats blocks, and teardown
//! sequencing. See `spec.md` §4.5.

pub mod config;
pub mod shutdown;
pub mod snapshot;
pub mod snapshot_request;
pub mod stats;
pub mod worker;

pub use config::{SnapshotSchedule, WorkerConfig};
pub use shutdown::ShutdownState;
pub use snapshot_request::SnapshotRequestState;
pub use stats::{WorkerStats, WorkerStatsSnapshot};
pub use worker::Worker;
