//! Renders the Prometheus text-format body for `GET /metrics`. `spec.md`
//! §6 names the exact metric families and the per-worker/aggregated
//! labelling convention; this module is a direct, literal implementation
//! of that list plus the `CACHEGRAND_METRIC_ENV_X` label-injection rule.

use std::fmt::Write as _;

use cachegrand_storage::StorageDb;
use cachegrand_worker::WorkerStatsSnapshot;

/// `CACHEGRAND_METRIC_ENV_FOO=bar` becomes the extra label `foo="bar"`
/// appended to every metric line, per `spec.md` §6.
const ENV_LABEL_PREFIX: &str = "CACHEGRAND_METRIC_ENV_";

/// Collects `CACHEGRAND_METRIC_ENV_*` variables into `name="value"` label
/// fragments once, at server startup (env vars aren't expected to change
/// for the lifetime of the process).
pub fn collect_env_labels() -> Vec<String> {
    let mut labels: Vec<String> = std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(ENV_LABEL_PREFIX)
                .map(|name| format!("{}=\"{}\"", name.to_ascii_lowercase(), escape(&value)))
        })
        .collect();
    labels.sort();
    labels
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn label_string(worker: &str, env_labels: &[String]) -> String {
    let mut labels = vec![format!("worker=\"{worker}\"")];
    labels.extend(env_labels.iter().cloned());
    labels.join(",")
}

fn emit_gauge(out: &mut String, name: &str, value: impl std::fmt::Display, labels: &str) {
    let _ = writeln!(out, "{name}{{{labels}}} {value}");
}

struct Totals {
    received_packets: u64,
    received_data: u64,
    sent_packets: u64,
    sent_data: u64,
    accepted_connections: u64,
    active_connections: u64,
    accepted_tls_connections: u64,
    active_tls_connections: u64,
    written_data: u64,
    write_iops: u64,
    read_data: u64,
    read_iops: u64,
    open_files: u64,
}

impl Totals {
    fn zero() -> Self {
        Self {
            received_packets: 0,
            received_data: 0,
            sent_packets: 0,
            sent_data: 0,
            accepted_connections: 0,
            active_connections: 0,
            accepted_tls_connections: 0,
            active_tls_connections: 0,
            written_data: 0,
            write_iops: 0,
            read_data: 0,
            read_iops: 0,
            open_files: 0,
        }
    }

    fn add(&mut self, snap: &WorkerStatsSnapshot) {
        let n = &snap.network_total;
        let s = &snap.storage_total;
        self.received_packets += n.received_packets;
        self.received_data += n.received_data;
        self.sent_packets += n.sent_packets;
        self.sent_data += n.sent_data;
        self.accepted_connections += n.accepted_connections;
        self.active_connections += n.active_connections as u64;
        self.accepted_tls_connections += n.accepted_tls_connections;
        self.active_tls_connections += n.active_tls_connections as u64;
        self.written_data += s.written_data;
        self.write_iops += s.write_iops;
        self.read_data += s.read_data;
        self.read_iops += s.read_iops;
        self.open_files += s.open_files as u64;
    }

    fn emit(&self, out: &mut String, labels: &str) {
        emit_gauge(out, "cachegrand_network_received_packets", self.received_packets, labels);
        emit_gauge(out, "cachegrand_network_received_data", self.received_data, labels);
        emit_gauge(out, "cachegrand_network_sent_packets", self.sent_packets, labels);
        emit_gauge(out, "cachegrand_network_sent_data", self.sent_data, labels);
        emit_gauge(out, "cachegrand_network_accepted_connections", self.accepted_connections, labels);
        emit_gauge(out, "cachegrand_network_active_connections", self.active_connections, labels);
        emit_gauge(
            out,
            "cachegrand_network_accepted_tls_connections",
            self.accepted_tls_connections,
            labels,
        );
        emit_gauge(out, "cachegrand_network_active_tls_connections", self.active_tls_connections, labels);
        emit_gauge(out, "cachegrand_storage_written_data", self.written_data, labels);
        emit_gauge(out, "cachegrand_storage_write_iops", self.write_iops, labels);
        emit_gauge(out, "cachegrand_storage_read_data", self.read_data, labels);
        emit_gauge(out, "cachegrand_storage_read_iops", self.read_iops, labels);
        emit_gauge(out, "cachegrand_storage_open_files", self.open_files, labels);
    }
}

/// Renders the full `/metrics` body: uptime, per-database key counts,
/// per-worker network/storage counters, and the `{worker="aggregated"}`
/// sum across every worker.
pub fn render(db: &StorageDb, worker_snapshots: &[WorkerStatsSnapshot], now_ms: u64, env_labels: &[String]) -> String {
    let mut out = String::new();

    let started_on_ms = worker_snapshots.iter().map(|s| s.started_on_ms).min().unwrap_or(now_ms);
    let uptime_secs = now_ms.saturating_sub(started_on_ms) / 1000;
    let uptime_labels = if env_labels.is_empty() {
        String::new()
    } else {
        env_labels.join(",")
    };
    emit_gauge(&mut out, "cachegrand_uptime", uptime_secs, &uptime_labels);

    for database_index in 0..db.database_count() {
        let labels = format!("database=\"{database_index}\"");
        let labels = if env_labels.is_empty() { labels } else { format!("{labels},{}", env_labels.join(",")) };
        emit_gauge(&mut out, "cachegrand_db_keys_count", db.dbsize(database_index), &labels);
        emit_gauge(&mut out, "cachegrand_db_size", db.dbsize(database_index), &labels);
    }

    let mut aggregated = Totals::zero();
    for (index, snap) in worker_snapshots.iter().enumerate() {
        aggregated.add(snap);
        let labels = label_string(&index.to_string(), env_labels);
        let mut worker_totals = Totals::zero();
        worker_totals.add(snap);
        worker_totals.emit(&mut out, &labels);
    }
    aggregated.emit(&mut out, &label_string("aggregated", env_labels));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegrand_storage::{SetOptions, StorageDbConfig};
    use cachegrand_worker::WorkerStats;

    #[test]
    fn renders_per_worker_and_aggregated_lines() {
        let db = StorageDb::new(StorageDbConfig::default());
        db.set(0, b"a", b"1", SetOptions::default(), 1_000).unwrap();

        let a = WorkerStats::new(1_000);
        a.record_received(1_000, 100);
        let b = WorkerStats::new(1_000);
        b.record_received(1_000, 50);

        let body = render(&db, &[a.snapshot(), b.snapshot()], 2_000, &[]);
        assert!(body.contains("cachegrand_network_received_data{worker=\"0\"} 100"));
        assert!(body.contains("cachegrand_network_received_data{worker=\"1\"} 50"));
        assert!(body.contains("cachegrand_network_received_data{worker=\"aggregated\"} 150"));
        assert!(body.contains("cachegrand_db_keys_count{database=\"0\"} 1"));
    }

    #[test]
    fn env_labels_are_appended_to_every_line() {
        let db = StorageDb::new(StorageDbConfig::default());
        let stats = WorkerStats::new(0);
        let body = render(&db, &[stats.snapshot()], 1_000, &["region=\"us\"".to_owned()]);
        assert!(body.contains("worker=\"0\",region=\"us\""));
        assert!(body.contains("worker=\"aggregated\",region=\"us\""));
    }
}
