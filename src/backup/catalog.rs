use std::{
    collections::BTreeMap,
    fs,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{Error, Result};

use super::{set_path, DateKey, Tier};

/// Mode for tier and backup set directories.
pub const DIR_MODE: u32 = 0o770;

/// Ordered date keys per tier, as read from disk at one point in time.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub tiers: BTreeMap<Tier, Vec<DateKey>>,
}

impl CatalogSnapshot {
    pub fn get(&self, tier: Tier) -> &[DateKey] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, tier: Tier) -> usize {
        self.get(tier).len()
    }

    /// Tier currently holding `date_key`, if any.
    pub fn tier_of(&self, date_key: DateKey) -> Option<Tier> {
        Tier::ALL
            .into_iter()
            .find(|tier| self.get(*tier).binary_search(&date_key).is_ok())
    }
}

/// Reads the `{backups_root}/{tier}/{YYYY-MM-DD}/` tree. Nothing is cached;
/// every call lists the directories again.
#[derive(Debug, Clone)]
pub struct Catalog {
    backups_root: PathBuf,
}

impl Catalog {
    pub fn new(backups_root: impl Into<PathBuf>) -> Self {
        Self {
            backups_root: backups_root.into(),
        }
    }

    pub fn backups_root(&self) -> &Path {
        &self.backups_root
    }

    pub fn set_path(&self, tier: Tier, date_key: DateKey) -> PathBuf {
        set_path(&self.backups_root, tier, date_key)
    }

    /// Date keys present in `tier`, ascending.
    pub fn list(&self, tier: Tier) -> Result<Vec<DateKey>> {
        let dir = tier.dir(&self.backups_root);
        let entries = fs::read_dir(&dir).map_err(|e| Error::Catalog {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Catalog {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
            let file_type = entry.file_type()?;
            let is_dir = file_type.is_dir()
                || (file_type.is_symlink() && entry.path().is_dir());
            if !is_dir {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match name.parse::<DateKey>() {
                Ok(key) => keys.push(key),
                Err(_) => {
                    warn!(tier = %tier, entry = %name, "ignoring non-date directory in backup tier");
                }
            }
        }
        keys.sort();
        debug!(tier = %tier, count = keys.len(), "listed backup tier");
        Ok(keys)
    }

    pub fn list_all(&self) -> Result<CatalogSnapshot> {
        let mut tiers = BTreeMap::new();
        for tier in Tier::ALL {
            tiers.insert(tier, self.list(tier)?);
        }
        Ok(CatalogSnapshot { tiers })
    }

    pub fn latest(&self, tier: Tier) -> Result<Option<DateKey>> {
        Ok(self.list(tier)?.last().copied())
    }

    /// Create any missing tier directory.
    pub fn ensure_layout(&self) -> Result<()> {
        for tier in Tier::ALL {
            let dir = tier.dir(&self.backups_root);
            if !dir.is_dir() {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(DIR_MODE)
                    .create(&dir)?;
                info!(path = %dir.display(), "created backups tier directory");
            }
        }
        Ok(())
    }
}
