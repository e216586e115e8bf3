//! The slice of process configuration a single worker needs to start up:
//! which CPU to pin to, which addresses to listen on, and its snapshot
//! schedule. `cachegrand-config` owns the full YAML file and slices one
//! of these per configured worker.

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SnapshotSchedule {
    pub path: Option<PathBuf>,
    pub interval_ms: Option<u64>,
    pub snapshot_at_shutdown: bool,
    pub server_version: String,
}

impl Default for SnapshotSchedule {
    fn default() -> Self {
        Self {
            path: None,
            interval_ms: None,
            snapshot_at_shutdown: false,
            server_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: usize,
    /// CPU slot to pin this worker's OS thread to; `None` leaves the
    /// thread unpinned (e.g. in tests).
    pub cpu_id: Option<usize>,
    pub bind_addrs: Vec<SocketAddr>,
    pub max_clients: usize,
    /// How often the timer fiber wakes to check for stats reset,
    /// TTL sweep, and snapshot due-ness.
    pub tick_interval_ms: u64,
    pub snapshot: SnapshotSchedule,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            cpu_id: None,
            bind_addrs: Vec::new(),
            max_clients: 10_000,
            tick_interval_ms: 1_000,
            snapshot: SnapshotSchedule::default(),
        }
    }
}
