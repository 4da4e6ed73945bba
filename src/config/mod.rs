//! Run configuration, loaded from a TOML file.
//!
//! # Example
//!
//! ```toml
//! backups_root = "/var/lib/backups"
//! rotation_weekday = 5
//! driver = "snapshot"
//! apply_log = true
//! apply_log_memory_budget = "1G"
//! credentials_file = "/etc/dbrotate/my.cnf"
//!
//! [executables]
//! snapshot = "/usr/bin/innobackupex"
//!
//! [retention]
//! daily_keep = 7
//! weekly_keep = 4
//! ```
//!
//! Unknown keys are reported with a warning and otherwise ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    backup::{CalendarPolicy, DriverKind, RetentionRules},
    Error, Result,
};

/// Name of the lock resource inside the backups root.
pub const LOCK_FILE: &str = "lock";

const TOP_LEVEL_KEYS: &[&str] = &[
    "backups_root",
    "rotation_weekday",
    "driver",
    "apply_log",
    "apply_log_memory_budget",
    "credentials_file",
    "default_backup_size_bytes",
    "executables",
    "retention",
];
const EXECUTABLE_KEYS: &[&str] = &["dump", "snapshot", "admin"];
const RETENTION_KEYS: &[&str] = &["daily_keep", "weekly_keep"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the `daily`, `weekly` and `monthly` tiers.
    #[serde(default = "default_backups_root")]
    pub backups_root: PathBuf,

    /// ISO weekday (1 = Monday .. 7 = Sunday) whose daily backup is kept as
    /// the weekly one. The last such weekday of a month is kept as monthly.
    #[serde(default = "default_rotation_weekday")]
    pub rotation_weekday: u32,

    #[serde(default)]
    pub driver: DriverKind,

    #[serde(default = "default_true")]
    pub apply_log: bool,

    #[serde(default = "default_memory_budget")]
    pub apply_log_memory_budget: String,

    /// Client options file with the connection parameters.
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,

    /// Space estimate used when no daily backup exists yet.
    #[serde(default)]
    pub default_backup_size_bytes: u64,

    #[serde(default)]
    pub executables: ExecutablesConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutablesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionConfig {
    #[serde(default = "default_daily_keep")]
    pub daily_keep: usize,
    #[serde(default = "default_weekly_keep")]
    pub weekly_keep: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily_keep: default_daily_keep(),
            weekly_keep: default_weekly_keep(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backups_root: default_backups_root(),
            rotation_weekday: default_rotation_weekday(),
            driver: DriverKind::default(),
            apply_log: true,
            apply_log_memory_budget: default_memory_budget(),
            credentials_file: default_credentials_file(),
            default_backup_size_bytes: 0,
            executables: ExecutablesConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

fn default_backups_root() -> PathBuf {
    PathBuf::from("/var/lib/backups")
}

fn default_rotation_weekday() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_memory_budget() -> String {
    "1G".into()
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("/etc/dbrotate/my.cnf")
}

fn default_daily_keep() -> usize {
    7
}

fn default_weekly_keep() -> usize {
    4
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(
                Error::Config(format!("config file {} does not exist", path.display())).into(),
            );
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "cannot read config file {}, please check permissions: {e}",
                path.display()
            ))
        })?;
        info!(path = %path.display(), "loading config file");
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let raw: toml::Table = contents
            .parse()
            .map_err(|e| Error::Config(format!("malformed config: {e}")))?;
        warn_unknown_keys(&raw);

        let config = toml::Value::Table(raw)
            .try_into::<Config>()
            .map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=7).contains(&self.rotation_weekday) {
            return Err(Error::Config(format!(
                "rotation_weekday must be within 1..=7, got {}",
                self.rotation_weekday
            ))
            .into());
        }
        if self.retention.daily_keep == 0 || self.retention.weekly_keep == 0 {
            return Err(Error::Config("retention capacities must be at least 1".into()).into());
        }
        if self.apply_log_memory_budget.trim().is_empty() {
            return Err(Error::Config("apply_log_memory_budget must not be empty".into()).into());
        }
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.backups_root.join(LOCK_FILE)
    }

    pub fn calendar(&self) -> Result<CalendarPolicy> {
        CalendarPolicy::new(self.rotation_weekday)
    }

    pub fn retention_rules(&self) -> RetentionRules {
        RetentionRules {
            daily_keep: self.retention.daily_keep,
            weekly_keep: self.retention.weekly_keep,
        }
    }
}

impl ExecutablesConfig {
    pub fn dump_path(&self) -> PathBuf {
        self.dump.clone().unwrap_or_else(|| find_executable("mysqldump"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot
            .clone()
            .unwrap_or_else(|| find_executable("innobackupex"))
    }

    pub fn admin_path(&self) -> PathBuf {
        self.admin
            .clone()
            .unwrap_or_else(|| find_executable("mysqladmin"))
    }
}

/// Look `name` up on `PATH`, falling back to `/usr/bin/<name>`.
pub fn find_executable(name: &str) -> PathBuf {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| Path::new("/usr/bin").join(name))
}

fn warn_unknown_keys(raw: &toml::Table) {
    for (key, value) in raw {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            warn!(key = %key, "ignoring unknown config key");
            continue;
        }
        let known: &[&str] = match key.as_str() {
            "executables" => EXECUTABLE_KEYS,
            "retention" => RETENTION_KEYS,
            _ => continue,
        };
        if let Some(section) = value.as_table() {
            for nested in section.keys() {
                if !known.contains(&nested.as_str()) {
                    warn!(key = %format!("{key}.{nested}"), "ignoring unknown config key");
                }
            }
        }
    }
}
