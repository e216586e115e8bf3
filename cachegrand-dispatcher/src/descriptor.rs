//! The static command descriptor table: name, arity, which argument
//! positions are keys (for lock acquisition), the per-slot lock mode, and
//! the handler. `spec.md` §9 calls for "dynamic dispatch via a static
//! descriptor table keyed by lowercased name" rather than a big `match`.

use crate::commands::*;
use crate::dispatch::DispatchContext;
use crate::error::DispatchError;
use cachegrand_protocol::Value;

pub type HandlerFn = fn(&mut DispatchContext) -> Result<Value, DispatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
    None,
}

/// `max_args == usize::MAX` means unbounded. Both counts include the
/// command name itself, matching how `args.len()` is checked against them.
pub struct CommandDescriptor {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub key_positions: &'static [usize],
    pub lock_mode: LockMode,
    pub handler: HandlerFn,
    /// Permitted before authentication, per `spec.md` §4.6 step 3.
    pub auth_exempt: bool,
}

macro_rules! cmd {
    ($name:expr, $min:expr, $max:expr, $keys:expr, $lock:expr, $handler:expr) => {
        CommandDescriptor {
            name: $name,
            min_args: $min,
            max_args: $max,
            key_positions: $keys,
            lock_mode: $lock,
            handler: $handler,
            auth_exempt: false,
        }
    };
    ($name:expr, $min:expr, $max:expr, $keys:expr, $lock:expr, $handler:expr, auth_exempt) => {
        CommandDescriptor {
            name: $name,
            min_args: $min,
            max_args: $max,
            key_positions: $keys,
            lock_mode: $lock,
            handler: $handler,
            auth_exempt: true,
        }
    };
}

const UNBOUNDED: usize = usize::MAX;
const NO_KEYS: &[usize] = &[];
const KEY1: &[usize] = &[1];
const KEY1_AND_2: &[usize] = &[1, 2];

pub static COMMANDS: &[CommandDescriptor] = &[
    // strings
    cmd!("SET", 3, UNBOUNDED, KEY1, LockMode::Write, strings::set),
    cmd!("GET", 2, 2, KEY1, LockMode::Read, strings::get),
    cmd!("GETEX", 2, UNBOUNDED, KEY1, LockMode::Write, strings::getex),
    cmd!("GETSET", 3, 3, KEY1, LockMode::Write, strings::getset),
    cmd!("GETRANGE", 4, 4, KEY1, LockMode::Read, strings::getrange),
    cmd!("GETDEL", 2, 2, KEY1, LockMode::Write, strings::getdel),
    cmd!("SETEX", 4, 4, KEY1, LockMode::Write, strings::setex),
    cmd!("PSETEX", 4, 4, KEY1, LockMode::Write, strings::psetex),
    cmd!("SETNX", 3, 3, KEY1, LockMode::Write, strings::setnx),
    cmd!("APPEND", 3, 3, KEY1, LockMode::Write, strings::append),
    cmd!("STRLEN", 2, 2, KEY1, LockMode::Read, strings::strlen),
    cmd!("MGET", 2, UNBOUNDED, NO_KEYS, LockMode::Read, strings::mget),
    cmd!("MSET", 3, UNBOUNDED, NO_KEYS, LockMode::Write, strings::mset),
    cmd!("MSETNX", 3, UNBOUNDED, NO_KEYS, LockMode::Write, strings::msetnx),
    cmd!("INCR", 2, 2, KEY1, LockMode::Write, strings::incr),
    cmd!("DECR", 2, 2, KEY1, LockMode::Write, strings::decr),
    cmd!("INCRBY", 3, 3, KEY1, LockMode::Write, strings::incrby),
    cmd!("DECRBY", 3, 3, KEY1, LockMode::Write, strings::decrby),
    cmd!("INCRBYFLOAT", 3, 3, KEY1, LockMode::Write, strings::incrbyfloat),
    cmd!("LCS", 3, UNBOUNDED, KEY1_AND_2, LockMode::Read, strings::lcs),
    // generic
    cmd!("EXISTS", 2, UNBOUNDED, NO_KEYS, LockMode::Read, generic::exists),
    cmd!("DEL", 2, UNBOUNDED, NO_KEYS, LockMode::Write, generic::del),
    cmd!("UNLINK", 2, UNBOUNDED, NO_KEYS, LockMode::Write, generic::del),
    cmd!("TOUCH", 2, UNBOUNDED, NO_KEYS, LockMode::Read, generic::touch),
    cmd!("COPY", 3, UNBOUNDED, KEY1_AND_2, LockMode::Write, generic::copy),
    cmd!("RENAME", 3, 3, KEY1_AND_2, LockMode::Write, generic::rename),
    cmd!("RENAMENX", 3, 3, KEY1_AND_2, LockMode::Write, generic::renamenx),
    cmd!("KEYS", 2, 2, NO_KEYS, LockMode::Read, generic::keys),
    cmd!("SCAN", 2, UNBOUNDED, NO_KEYS, LockMode::Read, generic::scan),
    cmd!("TTL", 2, 2, KEY1, LockMode::Read, generic::ttl),
    cmd!("PTTL", 2, 2, KEY1, LockMode::Read, generic::pttl),
    cmd!("EXPIRE", 3, UNBOUNDED, KEY1, LockMode::Write, generic::expire),
    cmd!("PEXPIRE", 3, UNBOUNDED, KEY1, LockMode::Write, generic::pexpire),
    cmd!("EXPIREAT", 3, UNBOUNDED, KEY1, LockMode::Write, generic::expireat),
    cmd!("PEXPIREAT", 3, UNBOUNDED, KEY1, LockMode::Write, generic::pexpireat),
    cmd!("EXPIRETIME", 2, 2, KEY1, LockMode::Read, generic::expiretime),
    cmd!("PEXPIRETIME", 2, 2, KEY1, LockMode::Read, generic::pexpiretime),
    cmd!("PERSIST", 2, 2, KEY1, LockMode::Write, generic::persist),
    cmd!("DBSIZE", 1, 1, NO_KEYS, LockMode::None, generic::dbsize),
    cmd!("RANDOMKEY", 1, 1, NO_KEYS, LockMode::Read, generic::randomkey),
    cmd!("FLUSHDB", 1, 2, NO_KEYS, LockMode::Write, generic::flushdb),
    // server
    cmd!("SELECT", 2, 2, NO_KEYS, LockMode::None, server::select),
    cmd!("PING", 1, 2, NO_KEYS, LockMode::None, server::ping, auth_exempt),
    cmd!("QUIT", 1, 1, NO_KEYS, LockMode::None, server::quit, auth_exempt),
    cmd!("HELLO", 1, UNBOUNDED, NO_KEYS, LockMode::None, server::hello, auth_exempt),
    cmd!("AUTH", 2, 3, NO_KEYS, LockMode::None, server::auth, auth_exempt),
    cmd!("BGSAVE", 1, 1, NO_KEYS, LockMode::None, server::bgsave),
    cmd!("SHUTDOWN", 1, 2, NO_KEYS, LockMode::None, server::shutdown),
];

/// Case-insensitive lookup by command name. A linear scan over ~60 entries
/// is cheap enough per command dispatch; `spec.md` doesn't call for a
/// perfect-hash table and the teacher's own routers use linear match arms.
pub fn lookup(name: &[u8]) -> Option<&'static CommandDescriptor> {
    COMMANDS.iter().find(|c| c.name.as_bytes().eq_ignore_ascii_case(name))
}
