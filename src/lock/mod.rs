//! Run lock: cross-process mutual exclusion over one backups root.
//!
//! The lock resource is `{backups_root}/lock`, held with a non-blocking
//! `flock(LOCK_EX)`. The JSON marker written into it only identifies the
//! holder for diagnostics; exclusivity comes from the OS lock alone.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::{fs::MetadataExt, io::AsRawFd},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::LOCK_FILE, Error, PreflightError, Result};

/// Attempts made when the lock file is replaced between open and `flock`.
const ACQUIRE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockMarker {
    pub run_id: Uuid,
    pub pid: u32,
    pub host: String,
    pub started_at: DateTime<Utc>,
}

impl LockMarker {
    pub fn for_current_process(run_id: Uuid) -> Self {
        Self {
            run_id,
            pid: std::process::id(),
            host: hostname(),
            started_at: Utc::now(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let marker: LockMarker = serde_json::from_slice(&data)?;
        Ok(marker)
    }
}

/// Lock scoped to one backups root.
#[derive(Debug, Clone)]
pub struct RunLock {
    backups_root: PathBuf,
    path: PathBuf,
}

/// Proof of an acquired [`RunLock`]. Give it back through [`RunLock::release`].
#[derive(Debug)]
pub struct LockHandle {
    file: File,
    marker: LockMarker,
}

impl LockHandle {
    pub fn marker(&self) -> &LockMarker {
        &self.marker
    }

    pub fn run_id(&self) -> Uuid {
        self.marker.run_id
    }
}

impl RunLock {
    pub fn new(backups_root: impl Into<PathBuf>) -> Self {
        let backups_root = backups_root.into();
        let path = backups_root.join(LOCK_FILE);
        Self { backups_root, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting. Fails with [`Error::LockHeld`] when
    /// another run holds it.
    pub fn acquire(&self, run_id: Uuid) -> Result<LockHandle> {
        if !self.backups_root.is_dir() {
            return Err(Error::Preflight(PreflightError::BackupsRootMissing(
                self.backups_root.display().to_string(),
            ))
            .into());
        }

        for _ in 0..ACQUIRE_ATTEMPTS {
            if let Some(handle) = self.lock_opened(self.open()?, run_id)? {
                return Ok(handle);
            }
            debug!(path = %self.path.display(), "lock file replaced while locking; retrying");
        }
        Err(self.held_error())
    }

    // Never truncate here: the file may belong to the current holder.
    fn open(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        Ok(file)
    }

    /// Lock an already opened lock file. Returns `Ok(None)` when the locked
    /// file is no longer the one at the lock path; dropping it unlocks it.
    fn lock_opened(&self, mut file: File, run_id: Uuid) -> Result<Option<LockHandle>> {
        if !try_flock(&file, libc::LOCK_EX | libc::LOCK_NB)? {
            return Err(self.held_error());
        }
        if !self.is_current(&file)? {
            return Ok(None);
        }

        let marker = LockMarker::for_current_process(run_id);
        file.set_len(0)?;
        file.write_all(&serde_json::to_vec_pretty(&marker)?)?;
        file.sync_all()?;

        info!(path = %self.path.display(), run_id = %run_id, "lock acquired");
        Ok(Some(LockHandle { file, marker }))
    }

    /// Whether `file` is still the inode at the lock path.
    fn is_current(&self, file: &File) -> Result<bool> {
        let opened = file.metadata()?;
        match fs::metadata(&self.path) {
            Ok(current) => Ok(current.dev() == opened.dev() && current.ino() == opened.ino()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn held_error(&self) -> anyhow::Error {
        let holder = match LockMarker::read(&self.path) {
            Ok(marker) => format!("pid {} on {}, run {}", marker.pid, marker.host, marker.run_id),
            Err(_) => "unknown holder".into(),
        };
        warn!(path = %self.path.display(), holder = %holder, "lock already held");
        Error::LockHeld {
            path: self.path.clone(),
            holder,
        }
        .into()
    }

    /// Unlock and remove the lock file. A lock file that is already gone is
    /// not an error.
    pub fn release(&self, handle: LockHandle) -> Result<()> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no lock file; nothing to release");
            return Ok(());
        }

        // A run that opened the old file before this removal locks a
        // detached inode; `is_current` makes it retry on the new file.
        fs::remove_file(&self.path).or_else(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        try_flock(&handle.file, libc::LOCK_UN)?;
        info!(path = %self.path.display(), run_id = %handle.run_id(), "lock released");
        Ok(())
    }

    /// Whether some process currently holds the lock.
    pub fn is_held(&self) -> Result<bool> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if try_flock(&file, libc::LOCK_SH | libc::LOCK_NB)? {
            try_flock(&file, libc::LOCK_UN)?;
            return Ok(false);
        }
        Ok(true)
    }
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "unknown".into();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// Returns `Ok(false)` when a non-blocking request would block.
fn try_flock(file: &File, operation: libc::c_int) -> io::Result<bool> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}
