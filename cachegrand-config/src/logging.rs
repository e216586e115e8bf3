//! Installs the global logging backend the `logs` configuration section
//! selects. Grounded on the teacher's own binaries
//! (`src/bin/proxmox-backup-proxy.rs` calls `syslog::init(...)` directly
//! at the top of `main`) and on the teacher's workspace dependency list,
//! which already carries both `env_logger` and `syslog` alongside `log`.

use log::LevelFilter;
use thiserror::Error;

use crate::config::{LogConfig, LogType};

#[derive(Debug, Error)]
pub enum LoggingSetupError {
    #[error("log config has type 'file' but no path was given")]
    MissingFilePath,
    #[error("failed to open log file {path}: {source}")]
    OpenLogFile { path: std::path::PathBuf, source: std::io::Error },
    #[error("failed to initialize syslog backend: {0}")]
    Syslog(String),
    #[error("unrecognized log level '{0}'")]
    UnknownLevel(String),
}

fn parse_level(level: &str) -> Result<LevelFilter, LoggingSetupError> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warning" | "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "verbose" => Ok(LevelFilter::Debug),
        "debug" => Ok(LevelFilter::Trace),
        other => Err(LoggingSetupError::UnknownLevel(other.to_owned())),
    }
}

/// Installs the first configured log sink as the global `log` backend.
/// `logs` is a list in the configuration shape (mirroring
/// `config_log_t *logs` / `logs_count` in `original_source/src/config.h`)
/// but only one global backend can be installed per process, so the
/// first entry wins; an empty list falls back to a console logger at
/// `info` level.
pub fn init(logs: &[LogConfig]) -> Result<(), LoggingSetupError> {
    let Some(log_config) = logs.first() else {
        env_logger::Builder::new().filter_level(LevelFilter::Info).init();
        return Ok(());
    };

    let level = parse_level(&log_config.level)?;

    match log_config.kind {
        LogType::Console => {
            env_logger::Builder::new().filter_level(level).init();
        }
        LogType::File => {
            let path = log_config.path.as_ref().ok_or(LoggingSetupError::MissingFilePath)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingSetupError::OpenLogFile { path: path.clone(), source })?;
            env_logger::Builder::new()
                .filter_level(level)
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
        LogType::Syslog => {
            syslog::init(syslog::Facility::LOG_DAEMON, level, Some("cachegrand"))
                .map_err(|err| LoggingSetupError::Syslog(err.to_string()))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_unknown_level() {
        assert!(matches!(parse_level("chatty"), Err(LoggingSetupError::UnknownLevel(_))));
    }

    #[test]
    fn maps_every_documented_level() {
        for level in ["off", "error", "warning", "info", "verbose", "debug"] {
            assert!(parse_level(level).is_ok(), "level {level} should parse");
        }
    }
}
