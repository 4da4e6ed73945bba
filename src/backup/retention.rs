use std::fs;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{config::LOCK_FILE, Error, Result};

use super::{
    calendar::{iso_week, seven_days_before, CalendarPolicy},
    catalog::Catalog,
    is_writable, DateKey, Tier,
};

/// Tier capacities. Monthly is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionRules {
    pub daily_keep: usize,
    pub weekly_keep: usize,
}

impl Default for RetentionRules {
    fn default() -> Self {
        Self {
            daily_keep: 7,
            weekly_keep: 4,
        }
    }
}

/// What a single retention pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RetentionOutcome {
    Promoted {
        date_key: DateKey,
        from: Tier,
        to: Tier,
    },
    Pruned {
        date_key: DateKey,
        tier: Tier,
    },
    /// Rotation day with a full daily tier, but no backup from a week ago.
    Missed { date_key: DateKey },
    Untouched,
}

#[derive(Debug, Clone)]
pub struct RetentionEngine {
    catalog: Catalog,
    calendar: CalendarPolicy,
    rules: RetentionRules,
}

impl RetentionEngine {
    pub fn new(catalog: Catalog, calendar: CalendarPolicy, rules: RetentionRules) -> Self {
        Self {
            catalog,
            calendar,
            rules,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs once per invocation, after the backup for `today` exists.
    #[instrument(skip(self))]
    pub fn daily_pass(&self, today: NaiveDate) -> Result<RetentionOutcome> {
        let daily = self.catalog.list(Tier::Daily)?;

        if self.calendar.is_rotation_day(today) {
            info!(
                weekday = self.calendar.rotation_weekday(),
                "rotation day"
            );
            if daily.len() <= self.rules.daily_keep {
                info!(
                    count = daily.len(),
                    keep = self.rules.daily_keep,
                    "not a full week of daily backups; nothing to do"
                );
                return Ok(RetentionOutcome::Untouched);
            }

            let week_ago = DateKey::new(seven_days_before(today));
            if daily.binary_search(&week_ago).is_err() {
                warn!(date_key = %week_ago, "no daily backup from a week ago to archive");
                return Ok(RetentionOutcome::Missed { date_key: week_ago });
            }

            info!(date_key = %week_ago, "archiving last week's daily backup as weekly");
            self.promote(week_ago, Tier::Daily, Tier::Weekly)?;
            return Ok(RetentionOutcome::Promoted {
                date_key: week_ago,
                from: Tier::Daily,
                to: Tier::Weekly,
            });
        }

        match daily.first() {
            Some(oldest) if daily.len() > self.rules.daily_keep => {
                info!(
                    date_key = %oldest,
                    count = daily.len(),
                    "more than a week of daily backups; removing oldest"
                );
                self.prune(*oldest, Tier::Daily)?;
                Ok(RetentionOutcome::Pruned {
                    date_key: *oldest,
                    tier: Tier::Daily,
                })
            }
            _ => Ok(RetentionOutcome::Untouched),
        }
    }

    /// Evaluates only the oldest weekly set; repeated runs drain an
    /// over-capacity tier one entry at a time.
    #[instrument(skip(self))]
    pub fn weekly_pass(&self) -> Result<RetentionOutcome> {
        let weekly = self.catalog.list(Tier::Weekly)?;

        let oldest = match weekly.first() {
            Some(oldest) if weekly.len() > self.rules.weekly_keep => *oldest,
            _ => {
                info!(
                    count = weekly.len(),
                    keep = self.rules.weekly_keep,
                    "weekly tier within capacity; nothing to do"
                );
                return Ok(RetentionOutcome::Untouched);
            }
        };

        let date = oldest.date();
        let target_week = self
            .calendar
            .last_qualifying_week_of_month(date.year(), date.month())?;
        let week = iso_week(date);

        if week == target_week {
            info!(
                date_key = %oldest,
                week,
                "archiving last weekly backup of the month as monthly"
            );
            self.promote(oldest, Tier::Weekly, Tier::Monthly)?;
            Ok(RetentionOutcome::Promoted {
                date_key: oldest,
                from: Tier::Weekly,
                to: Tier::Monthly,
            })
        } else {
            info!(
                date_key = %oldest,
                week,
                target_week,
                "removing oldest weekly backup; not in the last qualifying week of its month"
            );
            self.prune(oldest, Tier::Weekly)?;
            Ok(RetentionOutcome::Pruned {
                date_key: oldest,
                tier: Tier::Weekly,
            })
        }
    }

    /// Move a set one step coarser, keeping its date key.
    pub fn promote(&self, date_key: DateKey, from: Tier, to: Tier) -> Result<()> {
        if from.next() != Some(to) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        let fail = |reason: String| Error::Promotion {
            date_key: date_key.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason,
        };

        let source = self.catalog.set_path(from, date_key);
        let target_base = to.dir(self.catalog.backups_root());
        let target = self.catalog.set_path(to, date_key);

        if !source.is_dir() {
            return Err(fail(format!("source {} does not exist", source.display())).into());
        }
        if !is_writable(&target_base) {
            return Err(fail(format!("cannot write to {}", target_base.display())).into());
        }
        if target.exists() {
            return Err(fail(format!("target {} already exists", target.display())).into());
        }

        fs::rename(&source, &target).map_err(|e| {
            fail(format!(
                "rename {} -> {} failed: {e}",
                source.display(),
                target.display()
            ))
        })?;

        info!(
            date_key = %date_key,
            from = %from,
            to = %to,
            path = %target.display(),
            "backup set promoted"
        );
        Ok(())
    }

    /// Permanently delete a set. The resolved path must stay inside the
    /// backups root and must not be a tier directory or the lock file.
    pub fn prune(&self, date_key: DateKey, tier: Tier) -> Result<()> {
        let path = self.catalog.set_path(tier, date_key);
        if fs::symlink_metadata(&path).is_err() {
            return Err(Error::MissingBackup(path.display().to_string()).into());
        }

        let resolved = path
            .canonicalize()
            .map_err(|_| Error::MissingBackup(path.display().to_string()))?;
        let root = self.catalog.backups_root().canonicalize()?;

        let protected = Tier::ALL
            .iter()
            .map(|tier| {
                let dir = tier.dir(&root);
                dir.canonicalize().unwrap_or(dir)
            })
            .chain([root.join(LOCK_FILE)])
            .any(|reserved| reserved == resolved);

        if !resolved.starts_with(&root) || resolved == root || protected {
            warn!(
                path = %resolved.display(),
                root = %root.display(),
                "backup path escapes backups root"
            );
            return Err(Error::UnsafePrune {
                path: resolved.display().to_string(),
                root: root.display().to_string(),
            }
            .into());
        }

        if !is_writable(&resolved) {
            return Err(Error::NotWritable(resolved.display().to_string()).into());
        }

        fs::remove_dir_all(&resolved)?;
        info!(date_key = %date_key, tier = %tier, path = %resolved.display(), "backup set pruned");
        Ok(())
    }
}
