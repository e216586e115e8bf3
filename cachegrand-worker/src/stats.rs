//! Per-worker stats blocks: a `total` counter block that only grows, and
//! a `per_minute` block reset every 60s, matching the split in
//! `original_source/src/worker/worker_stats.h`. Internal to one worker
//! (no cross-worker locking); the metrics endpoint reads a [`WorkerStatsSnapshot`]
//! per worker and aggregates.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

const PER_MINUTE_RESET_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkSnapshot {
    pub received_packets: u64,
    pub received_data: u64,
    pub sent_packets: u64,
    pub sent_data: u64,
    pub accepted_connections: u64,
    pub active_connections: u16,
    pub accepted_tls_connections: u64,
    pub active_tls_connections: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StorageSnapshot {
    pub written_data: u64,
    pub write_iops: u64,
    pub read_data: u64,
    pub read_iops: u64,
    pub open_files: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStatsSnapshot {
    pub network_total: NetworkSnapshot,
    pub network_per_minute: NetworkSnapshot,
    pub storage_total: StorageSnapshot,
    pub storage_per_minute: StorageSnapshot,
    pub started_on_ms: u64,
    pub total_last_update_ms: u64,
    pub per_minute_last_update_ms: u64,
}

#[derive(Default)]
struct NetworkCounters {
    received_packets: AtomicU64,
    received_data: AtomicU64,
    sent_packets: AtomicU64,
    sent_data: AtomicU64,
    accepted_connections: AtomicU64,
    active_connections: AtomicU16,
    accepted_tls_connections: AtomicU64,
    active_tls_connections: AtomicU16,
}

impl NetworkCounters {
    fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            received_packets: self.received_packets.load(Ordering::Relaxed),
            received_data: self.received_data.load(Ordering::Relaxed),
            sent_packets: self.sent_packets.load(Ordering::Relaxed),
            sent_data: self.sent_data.load(Ordering::Relaxed),
            accepted_connections: self.accepted_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            accepted_tls_connections: self.accepted_tls_connections.load(Ordering::Relaxed),
            active_tls_connections: self.active_tls_connections.load(Ordering::Relaxed),
        }
    }

    fn reset_counts(&self) {
        self.received_packets.store(0, Ordering::Relaxed);
        self.received_data.store(0, Ordering::Relaxed);
        self.sent_packets.store(0, Ordering::Relaxed);
        self.sent_data.store(0, Ordering::Relaxed);
        self.accepted_connections.store(0, Ordering::Relaxed);
        self.accepted_tls_connections.store(0, Ordering::Relaxed);
        // active_connections/active_tls_connections are gauges, not
        // reset on the per-minute rollover.
    }
}

#[derive(Default)]
struct StorageCounters {
    written_data: AtomicU64,
    write_iops: AtomicU64,
    read_data: AtomicU64,
    read_iops: AtomicU64,
    open_files: AtomicU16,
}

impl StorageCounters {
    fn snapshot(&self) -> StorageSnapshot {
        StorageSnapshot {
            written_data: self.written_data.load(Ordering::Relaxed),
            write_iops: self.write_iops.load(Ordering::Relaxed),
            read_data: self.read_data.load(Ordering::Relaxed),
            read_iops: self.read_iops.load(Ordering::Relaxed),
            open_files: self.open_files.load(Ordering::Relaxed),
        }
    }

    fn reset_counts(&self) {
        self.written_data.store(0, Ordering::Relaxed);
        self.write_iops.store(0, Ordering::Relaxed);
        self.read_data.store(0, Ordering::Relaxed);
        self.read_iops.store(0, Ordering::Relaxed);
    }
}

pub struct WorkerStats {
    network_total: NetworkCounters,
    network_per_minute: NetworkCounters,
    storage_total: StorageCounters,
    storage_per_minute: StorageCounters,
    started_on_ms: u64,
    total_last_update_ms: AtomicU64,
    per_minute_last_update_ms: AtomicU64,
}

impl WorkerStats {
    pub fn new(now_ms: u64) -> Self {
        Self {
            network_total: NetworkCounters::default(),
            network_per_minute: NetworkCounters::default(),
            storage_total: StorageCounters::default(),
            storage_per_minute: StorageCounters::default(),
            started_on_ms: now_ms,
            total_last_update_ms: AtomicU64::new(now_ms),
            per_minute_last_update_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn record_connection_accepted(&self, now_ms: u64, tls: bool) {
        if tls {
            self.network_total.accepted_tls_connections.fetch_add(1, Ordering::Relaxed);
            self.network_total.active_tls_connections.fetch_add(1, Ordering::Relaxed);
            self.network_per_minute.accepted_tls_connections.fetch_add(1, Ordering::Relaxed);
        } else {
            self.network_total.accepted_connections.fetch_add(1, Ordering::Relaxed);
            self.network_total.active_connections.fetch_add(1, Ordering::Relaxed);
            self.network_per_minute.accepted_connections.fetch_add(1, Ordering::Relaxed);
        }
        self.touch_total(now_ms);
    }

    pub fn record_connection_closed(&self, tls: bool) {
        if tls {
            self.network_total.active_tls_connections.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.network_total.active_connections.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn active_connection_count(&self) -> usize {
        (self.network_total.active_connections.load(Ordering::Relaxed) as usize)
            + (self.network_total.active_tls_connections.load(Ordering::Relaxed) as usize)
    }

    pub fn record_received(&self, now_ms: u64, bytes: u64) {
        self.network_total.received_packets.fetch_add(1, Ordering::Relaxed);
        self.network_total.received_data.fetch_add(bytes, Ordering::Relaxed);
        self.network_per_minute.received_packets.fetch_add(1, Ordering::Relaxed);
        self.network_per_minute.received_data.fetch_add(bytes, Ordering::Relaxed);
        self.touch_total(now_ms);
    }

    pub fn record_sent(&self, now_ms: u64, bytes: u64) {
        self.network_total.sent_packets.fetch_add(1, Ordering::Relaxed);
        self.network_total.sent_data.fetch_add(bytes, Ordering::Relaxed);
        self.network_per_minute.sent_packets.fetch_add(1, Ordering::Relaxed);
        self.network_per_minute.sent_data.fetch_add(bytes, Ordering::Relaxed);
        self.touch_total(now_ms);
    }

    pub fn record_storage_read(&self, now_ms: u64, bytes: u64) {
        self.storage_total.read_iops.fetch_add(1, Ordering::Relaxed);
        self.storage_total.read_data.fetch_add(bytes, Ordering::Relaxed);
        self.storage_per_minute.read_iops.fetch_add(1, Ordering::Relaxed);
        self.storage_per_minute.read_data.fetch_add(bytes, Ordering::Relaxed);
        self.touch_total(now_ms);
    }

    pub fn record_storage_write(&self, now_ms: u64, bytes: u64) {
        self.storage_total.write_iops.fetch_add(1, Ordering::Relaxed);
        self.storage_total.written_data.fetch_add(bytes, Ordering::Relaxed);
        self.storage_per_minute.write_iops.fetch_add(1, Ordering::Relaxed);
        self.storage_per_minute.written_data.fetch_add(bytes, Ordering::Relaxed);
        self.touch_total(now_ms);
    }

    fn touch_total(&self, now_ms: u64) {
        self.total_last_update_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Called from the timer fiber. Resets the `per_minute` blocks once
    /// `PER_MINUTE_RESET_INTERVAL_MS` has elapsed since the last reset,
    /// matching `worker_stats_should_publish_after_interval`.
    pub fn maybe_reset_per_minute(&self, now_ms: u64) -> bool {
        let last = self.per_minute_last_update_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < PER_MINUTE_RESET_INTERVAL_MS {
            return false;
        }
        self.network_per_minute.reset_counts();
        self.storage_per_minute.reset_counts();
        self.per_minute_last_update_ms.store(now_ms, Ordering::Relaxed);
        true
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            network_total: self.network_total.snapshot(),
            network_per_minute: self.network_per_minute.snapshot(),
            storage_total: self.storage_total.snapshot(),
            storage_per_minute: self.storage_per_minute.snapshot(),
            started_on_ms: self.started_on_ms,
            total_last_update_ms: self.total_last_update_ms.load(Ordering::Relaxed),
            per_minute_last_update_ms: self.per_minute_last_update_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_connection_bumps_total_and_active() {
        let stats = WorkerStats::new(1_000);
        stats.record_connection_accepted(1_000, false);
        let snap = stats.snapshot();
        assert_eq!(snap.network_total.accepted_connections, 1);
        assert_eq!(snap.network_total.active_connections, 1);
        stats.record_connection_closed(false);
        assert_eq!(stats.snapshot().network_total.active_connections, 0);
    }

    #[test]
    fn per_minute_resets_only_after_interval_elapses() {
        let stats = WorkerStats::new(0);
        stats.record_received(0, 128);
        assert!(!stats.maybe_reset_per_minute(30_000));
        assert_eq!(stats.snapshot().network_per_minute.received_data, 128);

        assert!(stats.maybe_reset_per_minute(60_000));
        assert_eq!(stats.snapshot().network_per_minute.received_data, 0);
        // total never resets.
        assert_eq!(stats.snapshot().network_total.received_data, 128);
    }

    #[test]
    fn active_connection_count_combines_plain_and_tls() {
        let stats = WorkerStats::new(0);
        stats.record_connection_accepted(0, false);
        stats.record_connection_accepted(0, true);
        assert_eq!(stats.active_connection_count(), 2);
    }
}
