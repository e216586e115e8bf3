//! Builds and writes a point-in-time snapshot of a [`StorageDb`]. Grounded
//! directly on `cachegrand_storage::snapshot`'s own doc comment, which
//! names "the snapshot fiber in `cachegrand-worker`" as the caller
//! responsible for walking live entries, encoding, and the atomic rename.

use std::path::Path;

use cachegrand_storage::StorageDb;

use crate::config::SnapshotSchedule;

/// Walks every database via [`StorageDb::scan`], reading each key's
/// current value and TTL, and writes an encoded snapshot to
/// `schedule.path`. A no-op if no path is configured.
pub fn write_snapshot(db: &StorageDb, schedule: &SnapshotSchedule, now_ms: u64) -> std::io::Result<bool> {
    let Some(path) = schedule.path.as_ref() else {
        return Ok(false);
    };

    let entries = collect_entries(db, now_ms);
    let bytes = cachegrand_storage::snapshot::encode(
        now_ms,
        &schedule.server_version,
        enabled_databases_bitmap(db),
        &entries,
    );
    write_atomic(path, &bytes)?;
    log::info!("worker: wrote snapshot with {} entries to {}", entries.len(), path.display());
    Ok(true)
}

fn enabled_databases_bitmap(db: &StorageDb) -> u64 {
    let count = db.database_count().min(64);
    if count == 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

fn collect_entries(db: &StorageDb, now_ms: u64) -> Vec<cachegrand_storage::snapshot::SnapshotEntry> {
    let mut entries = Vec::new();
    for database_index in 0..db.database_count() {
        let mut cursor = 0u64;
        loop {
            let (next_cursor, keys) = db.scan(database_index, cursor, 256, now_ms);
            for key in keys {
                let Some(value) = db.get(database_index, &key, now_ms) else {
                    continue;
                };
                let expiry_time_ms = db.ttl_ms(database_index, &key, now_ms).flatten().unwrap_or(0);
                entries.push(cachegrand_storage::snapshot::SnapshotEntry {
                    database_index,
                    key: key.into_vec(),
                    value,
                    expiry_time_ms,
                    flags: 0,
                });
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
    }
    entries
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    cachegrand_storage::snapshot::write_atomic(path, bytes)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegrand_storage::{SetOptions, StorageDbConfig};

    #[test]
    fn writes_every_live_key_and_skips_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        let db = StorageDb::new(StorageDbConfig::default());
        db.set(0, b"a", b"1", SetOptions::default(), 1_000).unwrap();
        db.set(1, b"b", b"2", SetOptions::default(), 1_000).unwrap();

        let schedule = SnapshotSchedule {
            path: Some(path.clone()),
            interval_ms: None,
            snapshot_at_shutdown: true,
            server_version: "test".to_owned(),
        };
        assert!(write_snapshot(&db, &schedule, 1_000).unwrap());

        let raw = cachegrand_storage::snapshot::read_file(&path).unwrap();
        let decoded = cachegrand_storage::snapshot::decode(&raw).unwrap();
        assert_eq!(decoded.entries.len(), 2);
    }

    #[test]
    fn no_path_configured_is_a_silent_no_op() {
        let db = StorageDb::new(StorageDbConfig::default());
        let schedule = SnapshotSchedule::default();
        assert!(!write_snapshot(&db, &schedule, 1_000).unwrap());
    }
}
