//! Top-level dispatch: validate, gate, execute, reply. `spec.md` §4.6
//! numbers the steps 1–8; this function is their concrete composition.

use bytes::Bytes;
use cachegrand_protocol::Value;
use cachegrand_storage::StorageDb;

use crate::config::DispatcherConfig;
use crate::connection::Connection;
use crate::descriptor::lookup;
use crate::error::DispatchError;

/// Everything a command handler needs: the parsed argument vector
/// (`args[0]` is the command name), the connection it's running on, the
/// storage DB to operate against, the pending shutdown flag a SHUTDOWN
/// handler sets, the pending on-demand snapshot flag a BGSAVE handler
/// sets, and the wall-clock time the command was received at.
pub struct DispatchContext<'a> {
    pub conn: &'a mut Connection,
    pub db: &'a StorageDb,
    pub config: &'a DispatcherConfig,
    pub args: &'a [Bytes],
    pub now_ms: u64,
    pub shutdown: &'a mut Option<bool>,
    pub snapshot_requested: &'a mut bool,
}

impl<'a> DispatchContext<'a> {
    pub fn arg(&self, index: usize) -> &[u8] {
        self.args[index].as_ref()
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }

    pub fn parse_int(&self, index: usize) -> Result<i64, DispatchError> {
        std::str::from_utf8(self.arg(index))
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(DispatchError::NotAnInteger)
    }

    pub fn parse_float(&self, index: usize) -> Result<f64, DispatchError> {
        let text = std::str::from_utf8(self.arg(index)).map_err(|_| DispatchError::NotAFloat)?;
        text.parse::<f64>().map_err(|_| DispatchError::NotAFloat)
    }
}

pub fn dispatch(
    conn: &mut Connection,
    db: &StorageDb,
    config: &DispatcherConfig,
    args: &[Bytes],
    raw_len: usize,
    now_ms: u64,
    shutdown: &mut Option<bool>,
    snapshot_requested: &mut bool,
) -> Value {
    conn.mark_greeted();

    if args.is_empty() {
        return Value::ok();
    }

    let name = args[0].as_ref();
    let Some(descriptor) = lookup(name) else {
        return err(DispatchError::UnknownCommand {
            name: String::from_utf8_lossy(name).into_owned(),
            argc: args.len() - 1,
        });
    };

    if raw_len > config.max_command_length {
        return err(DispatchError::CommandTooLong {
            limit: config.max_command_length,
        });
    }
    if args.len() > config.max_command_arguments {
        return err(DispatchError::TooManyArguments {
            cmd: descriptor.name.to_ascii_lowercase(),
            argc: args.len(),
            limit: config.max_command_arguments,
        });
    }
    if args.len() < descriptor.min_args || args.len() > descriptor.max_args {
        return err(DispatchError::WrongArity {
            cmd: descriptor.name.to_ascii_lowercase(),
        });
    }
    for &pos in descriptor.key_positions {
        if let Some(key) = args.get(pos) {
            if key.len() > config.max_key_length {
                return err(DispatchError::KeyTooLong {
                    limit: config.max_key_length,
                });
            }
        }
    }
    if config.require_authentication && !conn.authenticated && !descriptor.auth_exempt {
        return err(DispatchError::AuthRequired);
    }
    if config.is_disabled(descriptor.name) {
        return err(DispatchError::CommandDisabled {
            cmd: descriptor.name.to_ascii_lowercase(),
        });
    }

    let mut ctx = DispatchContext {
        conn,
        db,
        config,
        args,
        now_ms,
        shutdown,
        snapshot_requested,
    };
    match (descriptor.handler)(&mut ctx) {
        Ok(value) => value,
        Err(e) => err(e),
    }
}

fn err(e: DispatchError) -> Value {
    Value::Error(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegrand_storage::{StorageDb, StorageDbConfig};

    fn args(items: &[&[u8]]) -> Vec<Bytes> {
        items.iter().map(|i| Bytes::copy_from_slice(i)).collect()
    }

    #[test]
    fn unknown_command_reports_name_and_argc() {
        let mut conn = Connection::new();
        let db = StorageDb::new(StorageDbConfig::default());
        let config = DispatcherConfig::default();
        let mut shutdown = None;
        let mut snapshot_requested = false;
        let reply = dispatch(
            &mut conn,
            &db,
            &config,
            &args(&[b"FROBNICATE", b"x"]),
            20,
            1_000,
            &mut shutdown,
            &mut snapshot_requested,
        );
        match reply {
            Value::Error(msg) => assert_eq!(msg, "ERR unknown command 'FROBNICATE' with '1' args"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn oversize_key_is_rejected_before_dispatch() {
        let mut conn = Connection::new();
        let db = StorageDb::new(StorageDbConfig::default());
        let config = DispatcherConfig {
            max_key_length: 4,
            ..DispatcherConfig::default()
        };
        let mut shutdown = None;
        let mut snapshot_requested = false;
        let reply = dispatch(
            &mut conn,
            &db,
            &config,
            &args(&[b"GET", b"toolongkey"]),
            20,
            1_000,
            &mut shutdown,
            &mut snapshot_requested,
        );
        match reply {
            Value::Error(msg) => assert_eq!(msg, "ERR The key length has exceeded the allowed size of '4'"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn auth_required_blocks_non_exempt_commands() {
        let mut conn = Connection::new();
        let db = StorageDb::new(StorageDbConfig::default());
        let config = DispatcherConfig {
            require_authentication: true,
            ..DispatcherConfig::default()
        };
        let mut shutdown = None;
        let mut snapshot_requested = false;
        let reply = dispatch(
            &mut conn,
            &db,
            &config,
            &args(&[b"GET", b"k"]),
            20,
            1_000,
            &mut shutdown,
            &mut snapshot_requested,
        );
        match reply {
            Value::Error(msg) => assert_eq!(msg, "NOAUTH Authentication required."),
            other => panic!("expected error, got {other:?}"),
        }

        let ping = dispatch(
            &mut conn,
            &db,
            &config,
            &args(&[b"PING"]),
            10,
            1_000,
            &mut shutdown,
            &mut snapshot_requested,
        );
        assert!(matches!(ping, Value::SimpleString(s) if s == "PONG"));
    }
}
