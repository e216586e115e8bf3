//! Exclusive-lock pidfile handling, grounded on `pbs-datastore`'s
//! `ProcessLocker` (`open_backup_lockfile`/flock idiom), reimplemented
//! directly over `nix::fcntl::flock` instead of the teacher's own lock
//! helper (that helper lives in `proxmox-sys`, not a workspace
//! dependency).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidfileError {
    #[error("failed to open pidfile {path}: {source}")]
    Open { path: PathBuf, source: std::io::Error },
    #[error("pidfile {path} is already locked by another process")]
    AlreadyLocked { path: PathBuf },
    #[error("failed to write pidfile {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

/// Holds the exclusive lock on a pidfile for the lifetime of the process.
/// Unlinks the file and releases the lock on drop.
pub struct PidfileGuard {
    path: PathBuf,
    file: File,
}

impl PidfileGuard {
    /// Opens `path` (creating it if needed), takes a non-blocking
    /// exclusive flock, truncates it, and writes the current PID.
    pub fn acquire(path: &Path) -> Result<Self, PidfileError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| PidfileError::Open { path: path.to_owned(), source })?;

        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock)
            .map_err(|_| PidfileError::AlreadyLocked { path: path.to_owned() })?;

        let mut file = file;
        write_pid(&mut file, path)?;

        Ok(Self { path: path.to_owned(), file })
    }
}

fn write_pid(file: &mut File, path: &Path) -> Result<(), PidfileError> {
    use std::io::{Seek, SeekFrom};
    file.set_len(0).map_err(|source| PidfileError::Write { path: path.to_owned(), source })?;
    file.seek(SeekFrom::Start(0)).map_err(|source| PidfileError::Write { path: path.to_owned(), source })?;
    writeln!(file, "{}", std::process::id()).map_err(|source| PidfileError::Write { path: path.to_owned(), source })
}

impl Drop for PidfileGuard {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
        if let Err(err) = std::fs::remove_file(&self.path) {
            log::warn!("pidfile: failed to remove {}: {err}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_the_current_pid_and_unlinks_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cachegrand.pid");

        {
            let _guard = PidfileGuard::acquire(&path).unwrap();
            let content = std::fs::read_to_string(&path).unwrap();
            assert_eq!(content.trim(), std::process::id().to_string());
        }

        assert!(!path.exists());
    }

    #[test]
    fn a_second_acquire_on_the_same_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cachegrand.pid");

        let _first = PidfileGuard::acquire(&path).unwrap();
        let second = PidfileGuard::acquire(&path);
        assert!(matches!(second, Err(PidfileError::AlreadyLocked { .. })));
    }
}
