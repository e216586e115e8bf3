//! Self-describing binary snapshot format: header, per-database entries,
//! checksummed footer. Writers build the whole buffer in memory then
//! write it out atomically via a `.tmp` file renamed into place — callers
//! (the snapshot fiber in `cachegrand-worker`) are responsible for the
//! rename-over step and for rotation of `max_files`.

use std::io::{Read, Write};

use crc32fast::Hasher;

use crate::error::{Result, StorageError};

const SNAPSHOT_MAGIC: [u8; 8] = *b"CGSNAP01";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub database_index: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// 0 = no expiry.
    pub expiry_time_ms: u64,
    pub flags: u32,
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

/// Serializes a full snapshot: header (magic, version, created_at,
/// server_version, enabled-db bitmap), then every entry in order, then a
/// footer (entry count, crc32 over everything preceding it).
pub fn encode(
    created_at_ms: u64,
    server_version: &str,
    enabled_databases_bitmap: u64,
    entries: &[SnapshotEntry],
) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    write_u32(&mut buf, SNAPSHOT_VERSION);
    write_u64(&mut buf, created_at_ms);
    write_bytes(&mut buf, server_version.as_bytes());
    write_u64(&mut buf, enabled_databases_bitmap);

    for entry in entries {
        write_u32(&mut buf, entry.database_index);
        write_bytes(&mut buf, &entry.key);
        write_bytes(&mut buf, &entry.value);
        write_u64(&mut buf, entry.expiry_time_ms);
        write_u32(&mut buf, entry.flags);
    }

    write_u32(&mut buf, entries.len() as u32);

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    let checksum = hasher.finalize();
    buf.extend_from_slice(&checksum.to_le_bytes());

    buf
}

pub struct DecodedSnapshot {
    pub created_at_ms: u64,
    pub server_version: String,
    pub enabled_databases_bitmap: u64,
    pub entries: Vec<SnapshotEntry>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(StorageError::SnapshotCorrupt("unexpected end of file".into()));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Parses and validates a snapshot buffer: checks the magic, reads every
/// entry, and verifies the footer checksum before returning anything.
/// Partial or corrupt files are rejected rather than partially loaded.
pub fn decode(buf: &[u8]) -> Result<DecodedSnapshot> {
    if buf.len() < 4 {
        return Err(StorageError::SnapshotCorrupt("file too short".into()));
    }
    let (body, checksum_bytes) = buf.split_at(buf.len() - 4);
    let expected_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());

    let mut hasher = Hasher::new();
    hasher.update(body);
    if hasher.finalize() != expected_checksum {
        return Err(StorageError::SnapshotCorrupt("checksum mismatch".into()));
    }

    let mut cursor = Cursor::new(body);
    let magic = cursor.take(8)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(StorageError::SnapshotCorrupt("bad magic".into()));
    }
    let version = cursor.u32()?;
    if version != SNAPSHOT_VERSION {
        return Err(StorageError::SnapshotCorrupt(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let created_at_ms = cursor.u64()?;
    let server_version = String::from_utf8(cursor.bytes()?)
        .map_err(|_| StorageError::SnapshotCorrupt("server_version is not utf8".into()))?;
    let enabled_databases_bitmap = cursor.u64()?;

    // Entry count lives right before the checksum; read every entry
    // that's left in the body, then confirm the count matches.
    let mut entries = Vec::new();
    while cursor.pos + 4 < body.len() {
        let database_index = cursor.u32()?;
        let key = cursor.bytes()?;
        let value = cursor.bytes()?;
        let expiry_time_ms = cursor.u64()?;
        let flags = cursor.u32()?;
        entries.push(SnapshotEntry {
            database_index,
            key,
            value,
            expiry_time_ms,
            flags,
        });

        // The footer's entry-count u32 sits exactly 4 bytes before the
        // end of `body`; once only those 4 bytes remain, stop.
        if cursor.pos + 4 == body.len() {
            break;
        }
    }
    let declared_count = cursor.u32()?;
    if declared_count as usize != entries.len() {
        return Err(StorageError::SnapshotCorrupt(format!(
            "entry count mismatch: header says {declared_count}, found {}",
            entries.len()
        )));
    }

    Ok(DecodedSnapshot {
        created_at_ms,
        server_version,
        enabled_databases_bitmap,
        entries,
    })
}

/// Writes `bytes` to `path.tmp` then renames over `path`, so readers
/// never observe a partial file. On I/O failure the prior `path` (if any)
/// is left untouched.
pub fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp_path).map_err(StorageError::SnapshotIo)?;
    file.write_all(bytes).map_err(StorageError::SnapshotIo)?;
    file.sync_all().map_err(StorageError::SnapshotIo)?;
    std::fs::rename(&tmp_path, path).map_err(StorageError::SnapshotIo)?;
    Ok(())
}

pub fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path).map_err(StorageError::SnapshotIo)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(StorageError::SnapshotIo)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_entries() -> Vec<SnapshotEntry> {
        vec![
            SnapshotEntry {
                database_index: 0,
                key: b"a".to_vec(),
                value: b"1".to_vec(),
                expiry_time_ms: 0,
                flags: 0,
            },
            SnapshotEntry {
                database_index: 1,
                key: b"b".to_vec(),
                value: b"22".to_vec(),
                expiry_time_ms: 5_000,
                flags: 0,
            },
        ]
    }

    #[test]
    fn round_trips_entries() {
        let encoded = encode(1_000, "0.1.0", 0b11, &sample_entries());
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.created_at_ms, 1_000);
        assert_eq!(decoded.server_version, "0.1.0");
        assert_eq!(decoded.enabled_databases_bitmap, 0b11);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[1].key, b"b");
        assert_eq!(decoded.entries[1].expiry_time_ms, 5_000);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut encoded = encode(1_000, "0.1.0", 0, &sample_entries());
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let encoded = encode(1_000, "0.1.0", 0, &sample_entries());
        let truncated = &encoded[..encoded.len() / 2];
        assert!(decode(truncated).is_err());
    }

    #[test]
    fn write_atomic_leaves_no_partial_file_on_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");
        let encoded = encode(1_000, "0.1.0", 0, &sample_entries());
        write_atomic(&path, &encoded).unwrap();
        let back = read_file(&path).unwrap();
        assert_eq!(back, encoded);
        assert!(!path.with_extension("tmp").exists());
    }
}
