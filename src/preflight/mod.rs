//! Environment checks run under the lock, before a backup is produced.
//!
//! Every check is independent; the first failure aborts the run.

use std::{
    ffi::CString,
    fs::{self, File},
    io,
    os::unix::{ffi::OsStrExt, fs::PermissionsExt},
    path::Path,
};

use tracing::{info, instrument};
use walkdir::WalkDir;

use crate::{
    backup::{is_writable, BackupDriver, Catalog, Tier},
    config::Config,
    Error, PreflightError, Result,
};

/// Headroom applied to the estimated size of the next backup, in percent
/// (a 1.1 multiplier).
pub const SPACE_HEADROOM_PERCENT: u128 = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceEstimate {
    pub required: u64,
    pub available: u64,
}

pub struct PreflightChecker<'a> {
    config: &'a Config,
    driver: &'a dyn BackupDriver,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(config: &'a Config, driver: &'a dyn BackupDriver) -> Self {
        Self { config, driver }
    }

    #[instrument(skip(self), fields(root = %self.config.backups_root.display(), driver = %self.driver.kind()))]
    pub fn run(&self) -> Result<()> {
        info!(
            credentials = %self.config.credentials_file.display(),
            "running preflight checks"
        );
        self.check_backups_root()?;
        self.check_space()?;
        self.check_credentials()?;
        self.driver.probe()?;
        self.check_executable()?;
        info!("preflight checks passed");
        Ok(())
    }

    pub fn check_backups_root(&self) -> Result<()> {
        let root = &self.config.backups_root;
        if !root.is_dir() {
            return Err(preflight(PreflightError::BackupsRootMissing(
                root.display().to_string(),
            )));
        }
        if !is_writable(root) {
            return Err(preflight(PreflightError::BackupsRootNotWritable(
                root.display().to_string(),
            )));
        }
        Ok(())
    }

    pub fn check_space(&self) -> Result<SpaceEstimate> {
        let estimate = SpaceEstimate {
            required: self.estimate_required_space()?,
            available: available_space(&self.config.backups_root)?,
        };
        info!(
            required = estimate.required,
            available = estimate.available,
            "estimated disk space"
        );
        ensure_space(estimate)?;
        Ok(estimate)
    }

    /// Size of the most recent daily backup, or the configured default when
    /// there is none yet.
    pub fn estimate_required_space(&self) -> Result<u64> {
        let catalog = Catalog::new(&self.config.backups_root);
        if !Tier::Daily.dir(&self.config.backups_root).is_dir() {
            return Ok(self.config.default_backup_size_bytes);
        }
        match catalog.latest(Tier::Daily)? {
            Some(latest) => Ok(dir_size(&catalog.set_path(Tier::Daily, latest))),
            None => Ok(self.config.default_backup_size_bytes),
        }
    }

    pub fn check_credentials(&self) -> Result<()> {
        let path = &self.config.credentials_file;
        if !path.exists() {
            return Err(preflight(PreflightError::CredentialsMissing(
                path.display().to_string(),
            )));
        }
        if File::open(path).is_err() {
            return Err(preflight(PreflightError::CredentialsUnreadable(
                path.display().to_string(),
            )));
        }
        Ok(())
    }

    pub fn check_executable(&self) -> Result<()> {
        if let Some((name, path)) = self.driver.executable() {
            if !is_executable(path) {
                return Err(preflight(PreflightError::ExecutableMissing {
                    name: name.to_string(),
                    path: path.display().to_string(),
                }));
            }
        }
        Ok(())
    }
}

/// Fails when `required` with its safety headroom exceeds `available`.
pub fn ensure_space(estimate: SpaceEstimate) -> Result<()> {
    let padded = estimate.required as u128 * SPACE_HEADROOM_PERCENT;
    if padded > estimate.available as u128 * 100 {
        return Err(preflight(PreflightError::InsufficientSpace {
            required: u64::try_from(padded.div_ceil(100)).unwrap_or(u64::MAX),
            available: estimate.available,
        }));
    }
    Ok(())
}

/// Free bytes available to unprivileged users on the filesystem holding `path`.
pub fn available_space(path: &Path) -> Result<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path contains a NUL byte: {}", path.display()),
            ))
        })?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(Error::Io(io::Error::last_os_error()).into());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

/// Apparent size of every regular file under `path`, like `du -s -b`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

fn preflight(err: PreflightError) -> anyhow::Error {
    Error::Preflight(err).into()
}
