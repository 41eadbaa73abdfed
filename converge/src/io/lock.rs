//! Run lock guarding against concurrent provisioning runs.
//!
//! The lock is an exclusive `flock` on an open handle kept for the guard's
//! lifetime, so the kernel releases it when the holder exits. The file also
//! carries the holder's pid, which is only a diagnostic: it names the holder
//! when the lock is busy and reveals a previous run that died holding it.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run ({}) holds {}", holder(.pid), .path.display())]
    Held { pid: Option<u32>, path: PathBuf },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

fn holder(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!("pid {pid}"),
        None => "pid unknown".to_string(),
    }
}

/// Held run lock; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock at `path` for the current process without blocking.
    pub fn acquire(path: &Path) -> Result<RunLock, LockError> {
        Self::acquire_as(path, std::process::id())
    }

    fn acquire_as(path: &Path, pid: u32) -> Result<RunLock, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }
        // No truncate: the current holder's pid must survive a failed attempt.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return Err(LockError::Held {
                    pid: read_pid(&mut file),
                    path: path.to_path_buf(),
                });
            }
            Err(err) => {
                return Err(LockError::Io(
                    anyhow::Error::new(err).context(format!("lock {}", path.display())),
                ));
            }
        }

        if let Some(stale) = read_pid(&mut file)
            && stale != pid
        {
            warn!(
                stale_pid = stale,
                path = %path.display(),
                "lock file exists but process is gone, overriding"
            );
        }
        write_pid(&mut file, Some(pid))
            .with_context(|| format!("write lock file {}", path.display()))?;
        debug!(pid, path = %path.display(), "run lock acquired");
        Ok(RunLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    // The file stays in place: unlinking a locked path lets a second opener
    // lock a fresh inode while a third still waits on the old one.
    fn drop(&mut self) {
        if let Err(err) = write_pid(&mut self.file, None) {
            warn!(err = %err, path = %self.path.display(), "failed to clear lock file");
        }
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(err = %err, path = %self.path.display(), "failed to release run lock");
        }
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid(file: &mut File, pid: Option<u32>) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    if let Some(pid) = pid {
        writeln!(file, "{pid}")?;
    }
    file.flush()
}
