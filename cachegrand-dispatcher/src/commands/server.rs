//! Server/connection commands: SELECT, PING, QUIT, HELLO, AUTH, BGSAVE,
//! SHUTDOWN.

use bytes::Bytes;
use cachegrand_protocol::{RespVersion, Value};

use super::opt_eq;
use crate::dispatch::DispatchContext;
use crate::error::DispatchError;

pub fn select(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let index = ctx.parse_int(1)?;
    if index < 0 {
        return Err(DispatchError::InvalidDbIndex);
    }
    ctx.conn.database_index = index as u32;
    Ok(Value::ok())
}

pub fn ping(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    if ctx.argc() == 2 {
        return Ok(Value::bulk(Bytes::copy_from_slice(ctx.arg(1))));
    }
    Ok(Value::SimpleString("PONG".to_owned()))
}

pub fn quit(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    ctx.conn.begin_draining();
    ctx.conn.close();
    Ok(Value::ok())
}

/// `spec.md` §8 scenario S6: without a requested protover, reply with a
/// 14-element RESP2 map of server identity fields.
pub fn hello(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    if ctx.argc() > 1 {
        let version = ctx.parse_int(1).map_err(|_| DispatchError::SyntaxError)?;
        ctx.conn.resp_version = match version {
            2 => RespVersion::Resp2,
            3 => RespVersion::Resp3,
            _ => return Err(DispatchError::SyntaxError),
        };

        let mut i = 2;
        while i < ctx.argc() {
            if opt_eq(ctx.arg(i), "AUTH") {
                if i + 2 >= ctx.argc() {
                    return Err(DispatchError::SyntaxError);
                }
                let password = ctx.arg(i + 2).to_vec();
                authenticate(ctx, &password)?;
                i += 3;
            } else {
                return Err(DispatchError::SyntaxError);
            }
        }
    }

    let pairs = vec![
        (Value::bulk(Bytes::from_static(b"server")), Value::bulk(Bytes::from_static(b"cachegrand-server"))),
        (Value::bulk(Bytes::from_static(b"version")), Value::bulk(Bytes::from_static(env!("CARGO_PKG_VERSION").as_bytes()))),
        (
            Value::bulk(Bytes::from_static(b"proto")),
            Value::Integer(match ctx.conn.resp_version {
                RespVersion::Resp2 => 2,
                RespVersion::Resp3 => 3,
            }),
        ),
        (Value::bulk(Bytes::from_static(b"id")), Value::Integer(0)),
        (Value::bulk(Bytes::from_static(b"mode")), Value::bulk(Bytes::from_static(b"standalone"))),
        (Value::bulk(Bytes::from_static(b"role")), Value::bulk(Bytes::from_static(b"master"))),
        (Value::bulk(Bytes::from_static(b"modules")), Value::Array(Some(vec![]))),
    ];
    Ok(Value::Map(pairs))
}

fn authenticate(ctx: &mut DispatchContext, password: &[u8]) -> Result<(), DispatchError> {
    if ctx.conn.authenticated {
        return Err(DispatchError::AuthAlreadyAuthenticated);
    }
    match &ctx.config.password {
        Some(expected) if expected.as_bytes() == password => {
            ctx.conn.authenticated = true;
            Ok(())
        }
        _ => Err(DispatchError::AuthWrongPass),
    }
}

pub fn auth(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    // AUTH password | AUTH username password — usernames are not modelled,
    // the last argument is always the password.
    let password = ctx.arg(ctx.argc() - 1).to_vec();
    authenticate(ctx, &password)?;
    Ok(Value::ok())
}

pub fn bgsave(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    *ctx.snapshot_requested = true;
    Ok(Value::SimpleString("Background saving started".to_owned()))
}

pub fn shutdown(ctx: &mut DispatchContext) -> Result<Value, DispatchError> {
    let save = if ctx.argc() > 1 {
        if opt_eq(ctx.arg(1), "SAVE") {
            true
        } else if opt_eq(ctx.arg(1), "NOSAVE") {
            false
        } else {
            return Err(DispatchError::SyntaxError);
        }
    } else {
        false
    };
    *ctx.shutdown = Some(save);
    Ok(Value::ok())
}
