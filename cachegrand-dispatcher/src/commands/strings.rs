//! String commands: SET, GET, GETEX, GETSET, GETRANGE, GETDEL, SETEX,
//! PSETEX, SETNX, APPEND, STRLEN, MGET, MSET, MSETNX, INCR/DECR family,
//! LCS.

use bytes::Bytes;
use cachegrand_protocol::Value;
use cachegrand_storage::{ExpireOpt, SetOptions};

use super::opt_eq;
use crate::dispatch::DispatchContext;
use crate::error::DispatchError;

fn parse_set_options(ctx: &DispatchContext, from: usize) -> Result<SetOptions, DispatchError> {
    let mut opts = SetOptions::default();
    let mut i = from;
    while i < ctx.argc() {
        let token = ctx.arg(i);
        if opt_eq(token, "NX") {
            opts.nx = true;
        } else if opt_eq(token, "XX") {
            opts.xx = true;
        } else if opt_eq(token, "GET") {
            opts.get = true;
        } else if opt_eq(token, "KEEPTTL") {
            opts.keepttl = true;
        } else if opt_eq(token, "EX") || opt_eq(token, "PX") || opt_eq(token, "EXAT") || opt_eq(token, "PXAT") {
            i += 1;
            if i >= ctx.argc() {
                return Err(DispatchError::SyntaxError);
            }
            let n = ctx.parse_int(i)?;
            if n <= 0 {
                return Err(DispatchError::InvalidExpireTime { cmd: "set".into() });
            }
            let n = n as u64;
            opts.expire = Some(if opt_eq(token, "EX") {
                ExpireOpt::Ex(n)
            } else if opt_eq(token, "PX") {
                ExpireOpt::Px(n)
            } else if opt_eq(token, "EXAT") {
                ExpireOpt::ExAt(n)
            } else {
                ExpireOpt::PxAt(n)
            });
        } else {
            return Err(DispatchError::SyntaxError);
        }
        i += 1;
    }
    if opts.nx && opts.xx {
        return Err(DispatchError::SyntaxError);
    }
    if opts.keepttl && opts.expire.is_some() {
        return Err(DispatchError::SyntaxError);
    }
    Ok(opts)
}

pub fn set(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1).to_vec();
    let value = ctx.arg(2).to_vec();
    let opts = parse_set_options(ctx, 3)?;
    let (outcome, prior) = ctx
        .db
        .set(ctx.conn.database_index, &key, &value, opts, ctx.now_ms)?;
    if opts.get {
        return Ok(match prior {
            Some(bytes) => Value::bulk(Bytes::from(bytes)),
            None => Value::nil_bulk(),
        });
    }
    Ok(match outcome {
        cachegrand_storage::ConditionOutcome::Applied => Value::ok(),
        cachegrand_storage::ConditionOutcome::NotSatisfied => Value::nil_bulk(),
    })
}

pub fn get(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1);
    Ok(match ctx.db.get(ctx.conn.database_index, key, ctx.now_ms) {
        Some(value) => Value::bulk(Bytes::from(value)),
        None => Value::nil_bulk(),
    })
}

pub fn getex(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1).to_vec();
    let dbi = ctx.conn.database_index;

    if ctx.argc() > 2 {
        let token = ctx.arg(2);
        if opt_eq(token, "PERSIST") {
            ctx.db.persist(dbi, &key, ctx.now_ms);
        } else if opt_eq(token, "EX") || opt_eq(token, "PX") || opt_eq(token, "EXAT") || opt_eq(token, "PXAT") {
            if ctx.argc() != 4 {
                return Err(DispatchError::SyntaxError);
            }
            let n = ctx.parse_int(3)?;
            if n <= 0 {
                return Err(DispatchError::InvalidExpireTime { cmd: "getex".into() });
            }
            let n = n as u64;
            let expiry = match () {
                _ if opt_eq(token, "EX") => ctx.now_ms + n * 1000,
                _ if opt_eq(token, "PX") => ctx.now_ms + n,
                _ if opt_eq(token, "EXAT") => n * 1000,
                _ => n,
            };
            ctx.db.expire_at(dbi, &key, expiry, ctx.now_ms);
        } else {
            return Err(DispatchError::SyntaxError);
        }
    }

    Ok(match ctx.db.get(dbi, &key, ctx.now_ms) {
        Some(value) => Value::bulk(Bytes::from(value)),
        None => Value::nil_bulk(),
    })
}

pub fn getset(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1).to_vec();
    let value = ctx.arg(2).to_vec();
    let (_, prior) = ctx.db.set(
        ctx.conn.database_index,
        &key,
        &value,
        SetOptions { get: true, ..SetOptions::default() },
        ctx.now_ms,
    )?;
    Ok(match prior {
        Some(bytes) => Value::bulk(Bytes::from(bytes)),
        None => Value::nil_bulk(),
    })
}

pub fn getrange(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1);
    let start = ctx.parse_int(2)?;
    let end = ctx.parse_int(3)?;
    let value = match ctx.db.get(ctx.conn.database_index, key, ctx.now_ms) {
        Some(v) => v,
        None => return Ok(Value::bulk(Bytes::new())),
    };
    let len = value.len() as i64;
    if len == 0 {
        return Ok(Value::bulk(Bytes::new()));
    }
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i
        }
    };
    let start = norm(start).min(len - 1).max(0);
    let end = norm(end).min(len - 1);
    if end < start {
        return Ok(Value::bulk(Bytes::new()));
    }
    let slice = value[start as usize..=end as usize].to_vec();
    Ok(Value::bulk(Bytes::from(slice)))
}

pub fn getdel(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1);
    let dbi = ctx.conn.database_index;
    Ok(match ctx.db.get(dbi, key, ctx.now_ms) {
        Some(value) => {
            ctx.db.delete(dbi, key);
            Value::bulk(Bytes::from(value))
        }
        None => Value::nil_bulk(),
    })
}

pub fn setex(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let seconds = ctx.parse_int(2)?;
    if seconds <= 0 {
        return Err(DispatchError::InvalidExpireTime { cmd: "setex".into() });
    }
    let key = ctx.arg(1).to_vec();
    let value = ctx.arg(3).to_vec();
    ctx.db.set(
        ctx.conn.database_index,
        &key,
        &value,
        SetOptions { expire: Some(ExpireOpt::Ex(seconds as u64)), ..SetOptions::default() },
        ctx.now_ms,
    )?;
    Ok(Value::ok())
}

pub fn psetex(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let ms = ctx.parse_int(2)?;
    if ms <= 0 {
        return Err(DispatchError::InvalidExpireTime { cmd: "psetex".into() });
    }
    let key = ctx.arg(1).to_vec();
    let value = ctx.arg(3).to_vec();
    ctx.db.set(
        ctx.conn.database_index,
        &key,
        &value,
        SetOptions { expire: Some(ExpireOpt::Px(ms as u64)), ..SetOptions::default() },
        ctx.now_ms,
    )?;
    Ok(Value::ok())
}

pub fn setnx(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1).to_vec();
    let value = ctx.arg(2).to_vec();
    let (outcome, _) = ctx.db.set(
        ctx.conn.database_index,
        &key,
        &value,
        SetOptions { nx: true, ..SetOptions::default() },
        ctx.now_ms,
    )?;
    Ok(Value::Integer(match outcome {
        cachegrand_storage::ConditionOutcome::Applied => 1,
        cachegrand_storage::ConditionOutcome::NotSatisfied => 0,
    }))
}

pub fn append(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1).to_vec();
    let suffix = ctx.arg(2).to_vec();
    let len = ctx.db.append(ctx.conn.database_index, &key, &suffix, ctx.now_ms)?;
    Ok(Value::Integer(len as i64))
}

pub fn strlen(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let key = ctx.arg(1);
    let len = ctx
        .db
        .get(ctx.conn.database_index, key, ctx.now_ms)
        .map(|v| v.len())
        .unwrap_or(0);
    Ok(Value::Integer(len as i64))
}

pub fn mget(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let values = (1..ctx.argc())
        .map(|i| match ctx.db.get(dbi, ctx.arg(i), ctx.now_ms) {
            Some(v) => Value::bulk(Bytes::from(v)),
            None => Value::nil_bulk(),
        })
        .collect();
    Ok(Value::Array(Some(values)))
}

pub fn mset(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    if (ctx.argc() - 1) % 2 != 0 {
        return Err(DispatchError::SyntaxError);
    }
    let dbi = ctx.conn.database_index;
    let mut i = 1;
    while i + 1 < ctx.argc() {
        let key = ctx.arg(i).to_vec();
        let value = ctx.arg(i + 1).to_vec();
        ctx.db.set(dbi, &key, &value, SetOptions::default(), ctx.now_ms)?;
        i += 2;
    }
    Ok(Value::ok())
}

pub fn msetnx(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    if (ctx.argc() - 1) % 2 != 0 {
        return Err(DispatchError::SyntaxError);
    }
    let dbi = ctx.conn.database_index;
    let mut i = 1;
    while i + 1 < ctx.argc() {
        if ctx.db.exists(dbi, ctx.arg(i), ctx.now_ms) {
            return Ok(Value::Integer(0));
        }
        i += 2;
    }
    let mut i = 1;
    while i + 1 < ctx.argc() {
        let key = ctx.arg(i).to_vec();
        let value = ctx.arg(i + 1).to_vec();
        ctx.db.set(
            dbi,
            &key,
            &value,
            SetOptions { nx: true, ..SetOptions::default() },
            ctx.now_ms,
        )?;
        i += 2;
    }
    Ok(Value::Integer(1))
}

fn current_int(ctx: &DispatchContext, key: &[u8]) -> Result<i64, DispatchError> {
    match ctx.db.get(ctx.conn.database_index, key, ctx.now_ms) {
        Some(bytes) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(DispatchError::NotAnInteger),
        None => Ok(0),
    }
}

fn store_int(ctx: &mut DispatchContext, key: &[u8], value: i64) -> Result<(), DispatchError> {
    ctx.db.set(
        ctx.conn.database_index,
        key,
        value.to_string().as_bytes(),
        SetOptions { keepttl: true, ..SetOptions::default() },
        ctx.now_ms,
    )?;
    Ok(())
}

pub fn incr(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    incrby_impl(ctx, 1)
}

pub fn decr(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    incrby_impl(ctx, -1)
}

pub fn incrby(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let delta = ctx.parse_int(2)?;
    incrby_impl(ctx, delta)
}

pub fn decrby(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let delta = ctx.parse_int(2)?;
    let delta = delta.checked_neg().ok_or(DispatchError::IncrDecrOverflow)?;
    incrby_impl(ctx, delta)
}

fn incrby_impl(ctx: &mut DispatchContext, delta: i64) -> Result<Value, DispatchError> {
    let key = ctx.arg(1).to_vec();
    let current = current_int(ctx, &key)?;
    let new_value = current.checked_add(delta).ok_or(DispatchError::IncrDecrOverflow)?;
    store_int(ctx, &key, new_value)?;
    Ok(Value::Integer(new_value))
}

pub fn incrbyfloat(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let delta = ctx.parse_float(2)?;
    if !delta.is_finite() {
        return Err(DispatchError::NotFiniteFloat);
    }
    let key = ctx.arg(1).to_vec();
    let current = match ctx.db.get(ctx.conn.database_index, &key, ctx.now_ms) {
        Some(bytes) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or(DispatchError::NotAFloat)?,
        None => 0.0,
    };
    let new_value = current + delta;
    if !new_value.is_finite() {
        return Err(DispatchError::NotFiniteFloat);
    }
    let formatted = format!("{new_value}");
    ctx.db.set(
        ctx.conn.database_index,
        &key,
        formatted.as_bytes(),
        SetOptions { keepttl: true, ..SetOptions::default() },
        ctx.now_ms,
    )?;
    Ok(Value::bulk(Bytes::from(formatted.into_bytes())))
}

pub fn lcs(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let dbi = ctx.conn.database_index;
    let a = ctx.db.get(dbi, ctx.arg(1), ctx.now_ms).unwrap_or_default();
    let b = ctx.db.get(dbi, ctx.arg(2), ctx.now_ms).unwrap_or_default();
    let want_len = ctx.argc() > 3 && opt_eq(ctx.arg(3), "LEN");

    let (n, m) = (a.len(), b.len());
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    if want_len {
        return Ok(Value::Integer(dp[n][m] as i64));
    }

    let mut result = Vec::with_capacity(dp[n][m] as usize);
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            result.push(a[i - 1]);
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    result.reverse();
    Ok(Value::bulk(Bytes::from(result)))
}
