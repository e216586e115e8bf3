//! Generic key-space commands: EXISTS, DEL, UNLINK, TOUCH, COPY, RENAME,
//! RENAMENX, KEYS, SCAN, TTL family, EXPIRE family, PERSIST, DBSIZE,
//! RANDOMKEY, FLUSHDB.

use bytes::Bytes;
use cachegrand_protocol::Value;
use cachegrand_storage::{ExpireOpt, SetOptions};

use super::opt_eq;
use crate::dispatch::DispatchContext;
use crate::error::DispatchError;
use crate::glob;

pub fn exists(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let count = (1..ctx.argc())
        .filter(|&i| ctx.db.exists(dbi, ctx.arg(i), ctx.now_ms))
        .count();
    Ok(Value::Integer(count as i64))
}

pub fn del(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let count = (1..ctx.argc()).filter(|&i| ctx.db.delete(dbi, ctx.arg(i))).count();
    Ok(Value::Integer(count as i64))
}

pub fn touch(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let count = (1..ctx.argc())
        .filter(|&i| ctx.db.get(dbi, ctx.arg(i), ctx.now_ms).is_some())
        .count();
    Ok(Value::Integer(count as i64))
}

pub fn copy(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let source = ctx.arg(1).to_vec();
    let dest = ctx.arg(2).to_vec();
    let mut replace = false;
    let mut i = 3;
    while i < ctx.argc() {
        if opt_eq(ctx.arg(i), "REPLACE") {
            replace = true;
        } else {
            return Err(DispatchError::SyntaxError);
        }
        i += 1;
    }

    let Some(value) = ctx.db.get(dbi, &source, ctx.now_ms) else {
        return Ok(Value::Integer(0));
    };
    if !replace && ctx.db.exists(dbi, &dest, ctx.now_ms) {
        return Ok(Value::Integer(0));
    }
    let ttl = ctx.db.ttl_ms(dbi, &source, ctx.now_ms).flatten();
    let opts = match ttl {
        Some(remaining) => SetOptions { expire: Some(ExpireOpt::Px(remaining)), ..SetOptions::default() },
        None => SetOptions::default(),
    };
    ctx.db.set(dbi, &dest, &value, opts, ctx.now_ms)?;
    Ok(Value::Integer(1))
}

pub fn rename(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let source = ctx.arg(1).to_vec();
    let dest = ctx.arg(2).to_vec();
    let Some(value) = ctx.db.get(dbi, &source, ctx.now_ms) else {
        return Err(DispatchError::NoSuchKey);
    };
    let ttl = ctx.db.ttl_ms(dbi, &source, ctx.now_ms).flatten();
    let opts = match ttl {
        Some(remaining) => SetOptions { expire: Some(ExpireOpt::Px(remaining)), ..SetOptions::default() },
        None => SetOptions::default(),
    };
    ctx.db.set(dbi, &dest, &value, opts, ctx.now_ms)?;
    ctx.db.delete(dbi, &source);
    Ok(Value::ok())
}

pub fn renamenx(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let source = ctx.arg(1).to_vec();
    let dest = ctx.arg(2).to_vec();
    let Some(value) = ctx.db.get(dbi, &source, ctx.now_ms) else {
        return Err(DispatchError::NoSuchKey);
    };
    if ctx.db.exists(dbi, &dest, ctx.now_ms) {
        return Ok(Value::Integer(0));
    }
    let ttl = ctx.db.ttl_ms(dbi, &source, ctx.now_ms).flatten();
    let opts = match ttl {
        Some(remaining) => SetOptions { expire: Some(ExpireOpt::Px(remaining)), ..SetOptions::default() },
        None => SetOptions::default(),
    };
    ctx.db.set(dbi, &dest, &value, opts, ctx.now_ms)?;
    ctx.db.delete(dbi, &source);
    Ok(Value::Integer(1))
}

pub fn keys(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let pattern = ctx.arg(1).to_vec();
    let mut found = Vec::new();
    let mut cursor = 0u64;
    loop {
        let (next_cursor, page) = ctx.db.scan(dbi, cursor, 256, ctx.now_ms);
        for key in page {
            if glob::matches(&pattern, &key) {
                found.push(Value::bulk(Bytes::from(key.into_vec())));
            }
        }
        cursor = next_cursor;
        if cursor == 0 {
            break;
        }
    }
    Ok(Value::Array(Some(found)))
}

pub fn scan(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let cursor = ctx.parse_int(1)?.max(0) as u64;
    let mut pattern: Option<Vec<u8>> = None;
    let mut count = 10usize;
    let mut i = 2;
    while i < ctx.argc() {
        if opt_eq(ctx.arg(i), "MATCH") {
            i += 1;
            if i >= ctx.argc() {
                return Err(DispatchError::SyntaxError);
            }
            pattern = Some(ctx.arg(i).to_vec());
        } else if opt_eq(ctx.arg(i), "COUNT") {
            i += 1;
            if i >= ctx.argc() {
                return Err(DispatchError::SyntaxError);
            }
            count = ctx.parse_int(i)?.max(1) as usize;
        } else {
            return Err(DispatchError::SyntaxError);
        }
        i += 1;
    }

    let (next_cursor, page) = ctx.db.scan(dbi, cursor, count, ctx.now_ms);
    let keys = page
        .into_iter()
        .filter(|k| pattern.as_deref().map(|p| glob::matches(p, k)).unwrap_or(true))
        .map(|k| Value::bulk(Bytes::from(k.into_vec())))
        .collect();
    Ok(Value::Array(Some(vec![
        Value::bulk(Bytes::from(next_cursor.to_string().into_bytes())),
        Value::Array(Some(keys)),
    ])))
}

pub fn ttl(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    Ok(Value::Integer(ttl_reply(ctx, 1000)?))
}

pub fn pttl(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    Ok(Value::Integer(ttl_reply(ctx, 1)?))
}

fn ttl_reply(ctx: &DispatchContext, divisor: u64) -> Result<i64, DispatchError> {
    let key = ctx.arg(1);
    match ctx.db.ttl_ms(ctx.conn.database_index, key, ctx.now_ms) {
        None => Ok(-2),
        Some(None) => Ok(-1),
        Some(Some(remaining_ms)) => Ok((remaining_ms / divisor) as i64),
    }
}

fn parse_expire_condition(ctx: &DispatchContext, from: usize) -> Result<(), DispatchError> {
    for i in from..ctx.argc() {
        let token = ctx.arg(i);
        if !(opt_eq(token, "NX") || opt_eq(token, "XX") || opt_eq(token, "GT") || opt_eq(token, "LT")) {
            return Err(DispatchError::SyntaxError);
        }
    }
    Ok(())
}

pub fn expire(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let seconds = ctx.parse_int(2)?;
    expire_impl(ctx, "expire", seconds.checked_mul(1000))
}

pub fn pexpire(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let ms = ctx.parse_int(2)?;
    expire_impl(ctx, "pexpire", Some(ms))
}

pub fn expireat(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let seconds = ctx.parse_int(2)?;
    expireat_impl(ctx, "expireat", seconds.checked_mul(1000))
}

pub fn pexpireat(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let ms = ctx.parse_int(2)?;
    expireat_impl(ctx, "pexpireat", Some(ms))
}

fn expire_impl(ctx: &mut DispatchContext, cmd: &str, delta_ms: Option<i64>) -> Result<Value, DispatchError> {
    parse_expire_condition(ctx, 3)?;
    let Some(delta_ms) = delta_ms else {
        return Err(DispatchError::InvalidExpireTime { cmd: cmd.into() });
    };
    let absolute = ctx.now_ms as i64 + delta_ms;
    if absolute < 0 {
        return Err(DispatchError::InvalidExpireTime { cmd: cmd.into() });
    }
    let key = ctx.arg(1).to_vec();
    let applied = ctx.db.expire_at(ctx.conn.database_index, &key, absolute as u64, ctx.now_ms);
    Ok(Value::Integer(if applied { 1 } else { 0 }))
}

fn expireat_impl(ctx: &mut DispatchContext, cmd: &str, absolute_ms: Option<i64>) -> Result<Value, DispatchError> {
    parse_expire_condition(ctx, 3)?;
    let Some(absolute_ms) = absolute_ms else {
        return Err(DispatchError::InvalidExpireTime { cmd: cmd.into() });
    };
    if absolute_ms < 0 {
        return Err(DispatchError::InvalidExpireTime { cmd: cmd.into() });
    }
    let key = ctx.arg(1).to_vec();
    let applied = ctx
        .db
        .expire_at(ctx.conn.database_index, &key, absolute_ms as u64, ctx.now_ms);
    Ok(Value::Integer(if applied { 1 } else { 0 }))
}

pub fn expiretime(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    Ok(Value::Integer(expiretime_reply(ctx, 1000)?))
}

pub fn pexpiretime(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    Ok(Value::Integer(expiretime_reply(ctx, 1)?))
}

fn expiretime_reply(ctx: &DispatchContext, divisor: u64) -> Result<i64, DispatchError> {
    let key = ctx.arg(1);
    match ctx.db.ttl_ms(ctx.conn.database_index, key, ctx.now_ms) {
        None => Ok(-2),
        Some(None) => Ok(-1),
        Some(Some(remaining_ms)) => Ok(((ctx.now_ms + remaining_ms) / divisor) as i64),
    }
}

pub fn persist(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1).to_vec();
    let had_ttl = ctx.db.persist(ctx.conn.database_index, &key, ctx.now_ms);
    Ok(Value::Integer(if had_ttl { 1 } else { 0 }))
}

pub fn dbsize(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    Ok(Value::Integer(ctx.db.dbsize(ctx.conn.database_index) as i64))
}

/// Walks one scan page from a cheap pseudo-random starting cursor and
/// returns its first live key. Not uniformly random across the whole
/// keyspace, but cost-bounded and good enough for a command whose own
/// contract ("return a random key") doesn't promise a distribution.
pub fn randomkey(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let seed = ctx.now_ms.wrapping_mul(2_685_821_657);
    let (_, page) = ctx.db.scan(dbi, seed & !0xFFFF_FFFF, 32, ctx.now_ms);
    if let Some(key) = page.into_iter().next() {
        return Ok(Value::bulk(Bytes::from(key.into_vec())));
    }
    let (_, page) = ctx.db.scan(dbi, 0, 32, ctx.now_ms);
    Ok(match page.into_iter().next() {
        Some(key) => Value::bulk(Bytes::from(key.into_vec())),
        None => Value::nil_bulk(),
    })
}

pub fn flushdb(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    if ctx.argc() > 1 && !opt_eq(ctx.arg(1), "ASYNC") && !opt_eq(ctx.arg(1), "SYNC") {
        return Err(DispatchError::SyntaxError);
    }
    ctx.db.flushdb(ctx.conn.database_index);
    Ok(Value::ok())
}
