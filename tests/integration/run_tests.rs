//! End-to-end runs with the test driver.

use std::{collections::HashSet, fs, path::Path};

use chrono::{Datelike, Duration, NaiveDate};
use dbrotate::{
    backup::{CalendarPolicy, Catalog, DateKey, RetentionOutcome, Tier},
    cli::run::run_once,
    config::Config,
    lock::RunLock,
    Error, PreflightError,
};
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

fn test_config(root: &Path, credentials_dir: &TempDir) -> Config {
    let credentials_file = credentials_dir.path().join("my.cnf");
    fs::write(&credentials_file, "[client]\n").unwrap();
    Config {
        backups_root: root.to_path_buf(),
        credentials_file,
        ..Config::default()
    }
}

#[test]
fn first_run_creates_layout_and_backup() -> dbrotate::Result<()> {
    let root = tempdir()?;
    let creds = tempdir()?;
    let config = test_config(root.path(), &creds);

    let report = run_once(&config, day("2024-03-29"))?;

    assert_eq!(root.path().join("daily/2024-03-29"), report.backup_path);
    assert!(report.backup_path.join("test.backup").exists());
    assert_eq!(RetentionOutcome::Untouched, report.daily);
    assert_eq!(RetentionOutcome::Untouched, report.weekly);
    for tier in Tier::ALL {
        assert!(root.path().join(tier.as_str()).is_dir());
    }
    assert!(!config.lock_path().exists());
    Ok(())
}

#[test]
fn refuses_to_overwrite_and_still_releases_lock() -> dbrotate::Result<()> {
    let root = tempdir()?;
    let creds = tempdir()?;
    let config = test_config(root.path(), &creds);

    run_once(&config, day("2024-03-29"))?;
    let err = run_once(&config, day("2024-03-29")).expect_err("same date twice");

    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::BackupExists(_))
    ));
    assert!(!config.lock_path().exists());
    Ok(())
}

#[test]
fn concurrent_run_is_rejected() -> dbrotate::Result<()> {
    let root = tempdir()?;
    let creds = tempdir()?;
    let config = test_config(root.path(), &creds);

    let lock = RunLock::new(root.path());
    let handle = lock.acquire(Uuid::new_v4())?;

    let err = run_once(&config, day("2024-03-29")).expect_err("lock is held");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::LockHeld { .. })
    ));
    assert!(!root.path().join("daily/2024-03-29").exists());

    lock.release(handle)?;
    run_once(&config, day("2024-03-29"))?;
    Ok(())
}

#[test]
fn preflight_failure_produces_nothing_and_releases_lock() {
    let root = tempdir().unwrap();
    let creds = tempdir().unwrap();
    let mut config = test_config(root.path(), &creds);
    config.default_backup_size_bytes = u64::MAX / 4;

    let err = run_once(&config, day("2024-03-29")).expect_err("no space");

    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Preflight(PreflightError::InsufficientSpace { .. }))
    ));
    assert!(!config.lock_path().exists());
    assert!(!root.path().join("daily/2024-03-29").exists());
}

#[test]
fn retention_failure_still_releases_lock() {
    let root = tempdir().unwrap();
    let creds = tempdir().unwrap();
    let config = test_config(root.path(), &creds);
    Catalog::new(root.path()).ensure_layout().unwrap();

    // A daily set that is really a symlink out of the backups root is the
    // oldest entry, so the daily prune must refuse it.
    let outside = tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path(), root.path().join("daily/2024-03-01")).unwrap();
    let last = day("2024-03-27");
    for offset in 0..7 {
        fs::create_dir(
            root.path()
                .join("daily")
                .join(DateKey::new(last - Duration::days(offset)).to_string()),
        )
        .unwrap();
    }

    let err = run_once(&config, day("2024-03-28")).expect_err("unsafe prune");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::UnsafePrune { .. })
    ));
    assert!(!config.lock_path().exists());
    assert!(outside.path().is_dir());
}

#[test]
fn long_simulation_keeps_tiers_bounded() -> dbrotate::Result<()> {
    let root = tempdir()?;
    let creds = tempdir()?;
    let config = test_config(root.path(), &creds);
    let calendar = CalendarPolicy::new(config.rotation_weekday)?;
    let catalog = Catalog::new(root.path());

    let start = day("2024-01-01");
    for offset in 0..180 {
        let today = start + Duration::days(offset);
        run_once(&config, today)?;

        let snapshot = catalog.list_all()?;
        assert!(snapshot.count(Tier::Daily) <= 7, "daily overflow on {today}");
        assert!(snapshot.count(Tier::Weekly) <= 4, "weekly overflow on {today}");

        let mut seen = HashSet::new();
        for tier in Tier::ALL {
            for key in snapshot.get(tier) {
                assert!(seen.insert(*key), "{key} present in two tiers");
            }
        }
        assert!(seen.contains(&DateKey::new(today)));
    }

    let monthly = catalog.list(Tier::Monthly)?;
    assert!(monthly.len() >= 4, "monthly sets: {monthly:?}");
    for key in &monthly {
        assert!(calendar.is_rotation_day(key.date()));
        assert!(calendar.in_last_qualifying_week(key.date())?);
    }
    let months: HashSet<u32> = monthly.iter().map(|k| k.date().month()).collect();
    assert_eq!(monthly.len(), months.len());
    Ok(())
}
