//! Single-run lock: one sync at a time per data directory.
//!
//! The lock file is created exclusively and holds the owner's PID. A lock
//! whose process is gone is treated as stale and taken over.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::app::{QuireError, Result};

pub const LOCK_FILE: &str = "quire.lock";

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(LOCK_FILE)
    }

    /// Take the lock in `data_dir`, failing with `AlreadyRunning` if a live
    /// process holds it.
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = Self::path_in(data_dir);

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    file.sync_all()?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match read_pid(&path) {
                    Some(pid) if pid != std::process::id() && process_exists(pid) => {
                        return Err(QuireError::AlreadyRunning(pid));
                    }
                    stale => {
                        tracing::warn!(
                            "Removing stale lock {} (PID {:?})",
                            path.display(),
                            stale
                        );
                        match fs::remove_file(&path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(QuireError::Other(format!(
            "could not take run lock {}",
            path.display()
        )))
    }

    /// PID of the live holder of the lock in `data_dir`, if any.
    pub fn holder(data_dir: &Path) -> Option<u32> {
        read_pid(&Self::path_in(data_dir)).filter(|pid| process_exists(*pid))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use std::process::Command;
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn process_exists(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid)])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}
