//! YAML configuration loading, the `--config` CLI flag, and pidfile
//! locking. `spec.md` §6 scopes the CLI surface down to one flag and
//! leaves everything else config-file driven; see `config.rs` for the
//! deserialized shape and its conversions into the other crates'
//! config types.

pub mod cli;
pub mod config;
pub mod duration;
pub mod logging;
pub mod pidfile;
pub mod size;

pub use cli::Cli;
pub use config::Config;
pub use pidfile::{PidfileError, PidfileGuard};
