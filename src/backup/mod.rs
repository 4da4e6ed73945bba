//! Backup domain: tiers, date keys and the on-disk layout.
//!
//! Contains the calendar policy, catalog enumeration, retention engine and
//! the drivers that produce new backup sets.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::Error;

pub mod calendar;
pub mod catalog;
pub mod driver;
pub mod retention;

pub use calendar::CalendarPolicy;
pub use catalog::{Catalog, CatalogSnapshot};
pub use driver::{BackupDriver, DriverKind};
pub use retention::{RetentionEngine, RetentionOutcome, RetentionRules};

pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Retention granularity, ordered by coarseness.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Daily, Tier::Weekly, Tier::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }

    /// The next coarser tier a set can be promoted into.
    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Daily => Some(Tier::Weekly),
            Tier::Weekly => Some(Tier::Monthly),
            Tier::Monthly => None,
        }
    }

    pub fn dir(&self, backups_root: &Path) -> PathBuf {
        backups_root.join(self.as_str())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            other => Err(Error::InvalidTier(other.to_string()).into()),
        }
    }
}

/// Calendar day a backup set represents. Renders as `YYYY-MM-DD`, so the
/// lexicographic order of directory names is the chronological order.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_KEY_FORMAT))
    }
}

impl FromStr for DateKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        // Reject non-canonical spellings like "2024-1-5" so names sort correctly.
        if s.len() != 10 {
            return Err(Error::InvalidDateKey(s.to_string()).into());
        }
        NaiveDate::parse_from_str(s, DATE_KEY_FORMAT)
            .map(Self)
            .map_err(|_| Error::InvalidDateKey(s.to_string()).into())
    }
}

/// One backup occurrence: `{backups_root}/{tier}/{date_key}/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupSet {
    pub tier: Tier,
    pub date_key: DateKey,
    pub location: PathBuf,
}

impl BackupSet {
    pub fn new(backups_root: &Path, tier: Tier, date_key: DateKey) -> Self {
        Self {
            tier,
            date_key,
            location: set_path(backups_root, tier, date_key),
        }
    }
}

pub fn set_path(backups_root: &Path, tier: Tier, date_key: DateKey) -> PathBuf {
    tier.dir(backups_root).join(date_key.to_string())
}

/// Checks effective write permission without creating anything in `path`.
pub(crate) fn is_writable(path: &Path) -> bool {
    use std::{ffi::CString, os::unix::ffi::OsStrExt};

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}
