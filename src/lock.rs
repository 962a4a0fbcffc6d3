//! Per-site mutual exclusion via lock files.
//!
//! A job takes `locks/{site_id}.lock` before touching a site and holds it until
//! it reaches a terminal state. Exclusion is an OS advisory lock on that file
//! (`flock` on Unix, `LockFileEx` on Windows), taken without blocking. The
//! kernel drops it when the holder's handle closes, including when the
//! process dies, so a crashed holder never leaves a site locked. The lock file
//! itself is never deleted: unlinking a locked file would let a later
//! contender lock a fresh inode while an earlier one still holds the old one.
//!
//! Who holds the lock is recorded next to it in `locks/{site_id}.holder`,
//! written atomically by the holder after the lock is taken:
//!
//! ```json
//! { "job_id": "5f0c…", "pid": 41233, "acquired_at": "2024-05-01T10:00:00Z" }
//! ```
//!
//! The holder file is only for reporting. A leftover one from a dead process
//! is ignored by [`holder`]. Handles in the *same* process conflict too, so
//! the lock is not reentrant.
//!
//! Dropping a [`SiteLock`] releases it.

use crate::types::{SiteId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("site {site} is busy with job {holder}")]
    Busy { site: SiteId, holder: String },
}

/// Contents of a holder file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub job_id: String,
    pub pid: u32,
    pub acquired_at: Timestamp,
}

/// A held site lock. Released on drop.
#[derive(Debug)]
pub struct SiteLock {
    site: SiteId,
    holder_path: PathBuf,
    job_id: String,
    // Closing the handle releases the OS lock; keep it last so the holder
    // file is gone before that happens.
    _file: File,
}

impl SiteLock {
    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for SiteLock {
    fn drop(&mut self) {
        // Still locked here, so nobody else can have rewritten the holder file.
        match fs::remove_file(&self.holder_path) {
            Ok(()) => debug!(site = %self.site, job = %self.job_id, "released site lock"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(site = %self.site, error = %e, "failed to remove lock holder file"),
        }
    }
}

fn lock_path(locks_dir: &Path, site: SiteId) -> PathBuf {
    locks_dir.join(format!("{site}.lock"))
}

fn holder_path(locks_dir: &Path, site: SiteId) -> PathBuf {
    locks_dir.join(format!("{site}.holder"))
}

fn read_info(path: &Path) -> io::Result<Option<LockInfo>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content).ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_info(path: &Path, info: &LockInfo) -> io::Result<()> {
    let tmp = path.with_extension(format!("holder.{}.tmp", Uuid::new_v4()));
    let json = serde_json::to_string(info).map_err(io::Error::other)?;
    let mut file = File::create(&tmp)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Check whether a process is still running.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Try to take the lock for `site` on behalf of `job_id`.
///
/// Fails immediately with [`LockError::Busy`] when another handle holds it.
pub fn acquire(locks_dir: &Path, site: SiteId, job_id: &str) -> Result<SiteLock, LockError> {
    fs::create_dir_all(locks_dir)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(locks_dir, site))?;
    let holder_path = holder_path(locks_dir, site);

    match file.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => {
            let holder = read_info(&holder_path)?
                .map(|h| h.job_id)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LockError::Busy { site, holder });
        }
        Err(TryLockError::Error(e)) => return Err(e.into()),
    }

    if let Some(previous) = read_info(&holder_path)? {
        warn!(site = %site, stale_job = %previous.job_id, pid = previous.pid, "replacing holder record left by a dead process");
    }
    let info = LockInfo {
        job_id: job_id.to_string(),
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    write_info(&holder_path, &info)?;
    debug!(site = %site, job = %job_id, "acquired site lock");
    Ok(SiteLock {
        site,
        holder_path,
        job_id: job_id.to_string(),
        _file: file,
    })
}

/// Current live holder of a site's lock, if any.
///
/// Reads the holder file only and never touches the lock, so polling it
/// cannot make a concurrent [`acquire`] fail.
pub fn holder(locks_dir: &Path, site: SiteId) -> Result<Option<LockInfo>, LockError> {
    Ok(read_info(&holder_path(locks_dir, site))?.filter(|info| is_process_alive(info.pid)))
}
