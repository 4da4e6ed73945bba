use std::path::PathBuf;

use dbrotate::{backup::DriverKind, config::Config};
use tempfile::tempdir;

fn config_error(result: dbrotate::Result<Config>) -> String {
    let err = result.expect_err("config should be rejected");
    match err.downcast_ref::<dbrotate::Error>() {
        Some(dbrotate::Error::Config(msg)) => msg.clone(),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn loads_full_config() -> dbrotate::Result<()> {
    let config = Config::from_str(
        r#"
        backups_root = "/srv/backups"
        rotation_weekday = 4
        driver = "snapshot"
        apply_log = false
        apply_log_memory_budget = "2G"
        credentials_file = "/etc/dbrotate/client.cnf"
        default_backup_size_bytes = 1048576

        [executables]
        snapshot = "/opt/xtrabackup/bin/innobackupex"

        [retention]
        daily_keep = 10
        "#,
    )?;

    assert_eq!(PathBuf::from("/srv/backups"), config.backups_root);
    assert_eq!(4, config.rotation_weekday);
    assert_eq!(DriverKind::Snapshot, config.driver);
    assert!(!config.apply_log);
    assert_eq!("2G", config.apply_log_memory_budget);
    assert_eq!(1_048_576, config.default_backup_size_bytes);
    assert_eq!(
        PathBuf::from("/opt/xtrabackup/bin/innobackupex"),
        config.executables.snapshot_path()
    );
    assert_eq!(10, config.retention_rules().daily_keep);
    assert_eq!(4, config.retention_rules().weekly_keep);
    assert_eq!(PathBuf::from("/srv/backups/lock"), config.lock_path());
    Ok(())
}

#[test]
fn empty_config_uses_defaults() -> dbrotate::Result<()> {
    let config = Config::from_str("")?;
    assert_eq!(Config::default(), config);
    assert_eq!(5, config.rotation_weekday);
    assert_eq!(DriverKind::Test, config.driver);
    assert!(config.apply_log);
    assert_eq!("1G", config.apply_log_memory_budget);
    Ok(())
}

#[test]
fn unknown_keys_are_ignored() -> dbrotate::Result<()> {
    let config = Config::from_str(
        r#"
        rotation_weekday = 2
        verbose = true

        [retention]
        yearly_keep = 3
        "#,
    )?;
    assert_eq!(2, config.rotation_weekday);
    Ok(())
}

#[test]
fn rejects_invalid_values() {
    let msg = config_error(Config::from_str("rotation_weekday = 0"));
    assert!(msg.contains("rotation_weekday"));
    config_error(Config::from_str("rotation_weekday = 8"));
    config_error(Config::from_str("driver = \"tape\""));
    config_error(Config::from_str("[retention]\nweekly_keep = 0"));
    config_error(Config::from_str("rotation_weekday = ["));
}

#[test]
fn missing_config_file_is_a_config_error() {
    let dir = tempdir().unwrap();
    let msg = config_error(Config::from_file(dir.path().join("absent.toml")));
    assert!(msg.contains("does not exist"));
}

#[test]
fn reads_config_from_file() -> dbrotate::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("dbrotate.toml");
    std::fs::write(&path, "driver = \"dump\"\nrotation_weekday = 7\n")?;

    let config = Config::from_file(&path)?;
    assert_eq!(DriverKind::Dump, config.driver);
    assert!(config.calendar()?.is_rotation_day(
        chrono::NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
    ));
    Ok(())
}
