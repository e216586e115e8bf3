//! Command dispatch: a static descriptor table mapping RESP command
//! names to argument validation rules and handlers, a per-connection
//! state machine, and canonical bit-exact error strings.

pub mod commands;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod dispatch;
pub mod error;
mod glob;

pub use config::DispatcherConfig;
pub use connection::{Connection, ConnectionState};
pub use descriptor::{lookup, CommandDescriptor, LockMode, COMMANDS};
pub use dispatch::{dispatch, DispatchContext};
pub use error::DispatchError;
