//! The concrete byte-exact scenarios from `spec.md` §8: S1 through S8.

use bytes::Bytes;
use cachegrand_dispatcher::{dispatch, Connection, DispatcherConfig};
use cachegrand_protocol::RespVersion;
use cachegrand_storage::{StorageDb, StorageDbConfig};

fn cmd(items: &[&[u8]]) -> Vec<Bytes> {
    items.iter().map(|i| Bytes::copy_from_slice(i)).collect()
}

struct Harness {
    conn: Connection,
    db: StorageDb,
    config: DispatcherConfig,
    shutdown: Option<bool>,
    snapshot_requested: bool,
}

impl Harness {
    fn new() -> Self {
        Self {
            conn: Connection::new(),
            db: StorageDb::new(StorageDbConfig::default()),
            config: DispatcherConfig::default(),
            shutdown: None,
            snapshot_requested: false,
        }
    }

    fn run(&mut self, args: &[&[u8]], now_ms: u64) -> Bytes {
        let reply = dispatch(
            &mut self.conn,
            &self.db,
            &self.config,
            &cmd(args),
            64,
            now_ms,
            &mut self.shutdown,
            &mut self.snapshot_requested,
        );
        reply.to_bytes(self.conn.resp_version)
    }
}

#[test]
fn s1_set_then_get() {
    let mut h = Harness::new();
    assert_eq!(h.run(&[b"SET", b"a_key", b"b_value"], 1_000), Bytes::from_static(b"+OK\r\n"));
    assert_eq!(h.run(&[b"GET", b"a_key"], 1_000), Bytes::from_static(b"$7\r\nb_value\r\n"));
}

#[test]
fn s2_px_expiry() {
    let mut h = Harness::new();
    assert_eq!(
        h.run(&[b"SET", b"a_key", b"b_value", b"PX", b"500"], 1_000),
        Bytes::from_static(b"+OK\r\n")
    );
    assert_eq!(h.run(&[b"GET", b"a_key"], 1_600), Bytes::from_static(b"$-1\r\n"));
}

#[test]
fn s3_append() {
    let mut h = Harness::new();
    assert_eq!(h.run(&[b"APPEND", b"a_key", b"b_value"], 1_000), Bytes::from_static(b":7\r\n"));
    assert_eq!(h.run(&[b"APPEND", b"a_key", b"c_value"], 1_000), Bytes::from_static(b":14\r\n"));
    assert_eq!(
        h.run(&[b"GET", b"a_key"], 1_000),
        Bytes::from_static(b"$14\r\nb_valuec_value\r\n")
    );
}

#[test]
fn s4_incr_type_error() {
    let mut h = Harness::new();
    assert_eq!(h.run(&[b"INCR", b"a_key"], 1_000), Bytes::from_static(b":1\r\n"));
    h.run(&[b"SET", b"a_key", b"b_value"], 1_000);
    assert_eq!(
        h.run(&[b"INCR", b"a_key"], 1_000),
        Bytes::from_static(b"-ERR value is not an integer or out of range\r\n")
    );
}

#[test]
fn s5_mset_mget() {
    let mut h = Harness::new();
    h.run(&[b"MSET", b"a_key", b"a", b"b_key", b"b"], 1_000);
    assert_eq!(
        h.run(&[b"MGET", b"a_key", b"b_key", b"c_key"], 1_000),
        Bytes::from_static(b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$-1\r\n")
    );
}

#[test]
fn s6_hello_without_version() {
    let mut h = Harness::new();
    let reply = dispatch(
        &mut h.conn,
        &h.db,
        &h.config,
        &cmd(&[b"HELLO"]),
        16,
        1_000,
        &mut h.shutdown,
        &mut h.snapshot_requested,
    );
    let cachegrand_protocol::Value::Map(pairs) = reply else {
        panic!("expected a map reply");
    };
    assert_eq!(pairs.len(), 7, "14-element RESP2 map is 7 key/value pairs");
    let encoded = cachegrand_protocol::Value::Map(pairs).to_bytes(RespVersion::Resp2);
    assert!(encoded.starts_with(b"*14\r\n"));
    assert!(encoded.windows(b"cachegrand-server".len()).any(|w| w == b"cachegrand-server"));
    assert!(encoded.windows(b"standalone".len()).any(|w| w == b"standalone"));
    assert!(encoded.windows(b"master".len()).any(|w| w == b"master"));
}

#[test]
fn s7_select_isolates_databases() {
    let mut h = Harness::new();
    h.run(&[b"SELECT", b"1"], 1_000);
    h.run(&[b"SET", b"a_key", b"z"], 1_000);
    h.run(&[b"SELECT", b"0"], 1_000);
    assert_eq!(h.run(&[b"GET", b"a_key"], 1_000), Bytes::from_static(b"$-1\r\n"));
}

#[test]
fn s8_shutdown() {
    let mut h = Harness::new();
    assert_eq!(h.run(&[b"SHUTDOWN"], 1_000), Bytes::from_static(b"+OK\r\n"));
    assert_eq!(h.shutdown, Some(false));

    let mut h = Harness::new();
    h.run(&[b"SHUTDOWN", b"SAVE"], 1_000);
    assert_eq!(h.shutdown, Some(true));
}

#[test]
fn bgsave_raises_the_snapshot_request_flag() {
    let mut h = Harness::new();
    assert_eq!(
        h.run(&[b"BGSAVE"], 1_000),
        Bytes::from_static(b"+Background saving started\r\n")
    );
    assert!(h.snapshot_requested);
}
