//! Implementation of `dbrotate run`: one backup plus one rotation.

use std::{fs, os::unix::fs::DirBuilderExt, path::PathBuf};

use chrono::{Local, NaiveDate};
use clap::Args;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    backup::{
        catalog::DIR_MODE, BackupDriver, Catalog, DateKey, DriverKind, RetentionEngine,
        RetentionOutcome, Tier,
    },
    cli::{ConfigArgs, OutputFormat},
    config::Config,
    lock::RunLock,
    logging,
    preflight::PreflightChecker,
    Error, Result,
};

#[derive(Debug, Clone, Args, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Date the backup represents (YYYY-MM-DD); defaults to today
    #[arg(long = "date")]
    pub date: Option<String>,

    /// Format of the report printed after the run
    #[arg(long = "report", value_enum, default_value = "text")]
    pub report: OutputFormat,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub date: DateKey,
    pub driver: DriverKind,
    pub backup_path: PathBuf,
    pub daily: RetentionOutcome,
    pub weekly: RetentionOutcome,
}

pub fn execute(args: RunArgs) -> Result<()> {
    let config = args.config.load()?;
    let date = match args.date.as_deref() {
        Some(raw) => raw.parse::<DateKey>()?.date(),
        None => Local::now().date_naive(),
    };

    let report = run_once(&config, date)?;

    match args.report {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("run {} for {}", report.run_id, report.date);
            println!("backup: {}", report.backup_path.display());
            println!("daily:  {}", logging::describe(&report.daily));
            println!("weekly: {}", logging::describe(&report.weekly));
        }
    }
    Ok(())
}

/// Acquire the lock, run preflight, produce the backup and rotate both tiers.
/// The lock is released on every path out of the run.
#[instrument(skip(config), fields(root = %config.backups_root.display()))]
pub fn run_once(config: &Config, date: NaiveDate) -> Result<RunReport> {
    let calendar = config.calendar()?;
    let driver = config.driver.build(config);
    let engine = RetentionEngine::new(
        Catalog::new(&config.backups_root),
        calendar,
        config.retention_rules(),
    );

    let run_id = Uuid::new_v4();
    let lock = RunLock::new(&config.backups_root);
    let handle = lock.acquire(run_id)?;

    let outcome = run_locked(config, driver.as_ref(), &engine, date, run_id);
    let released = lock.release(handle);

    match (outcome, released) {
        (Ok(report), Ok(())) => {
            logging::log_run_summary(&report);
            Ok(report)
        }
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            warn!(error = %release_err, "failed to release lock after failed run");
            Err(err)
        }
    }
}

fn run_locked(
    config: &Config,
    driver: &dyn BackupDriver,
    engine: &RetentionEngine,
    date: NaiveDate,
    run_id: Uuid,
) -> Result<RunReport> {
    PreflightChecker::new(config, driver).run()?;
    engine.catalog().ensure_layout()?;

    info!(
        driver = %driver.kind(),
        date = %DateKey::new(date),
        run_id = %run_id,
        "taking backup"
    );
    let backup_path = produce_backup(config, driver, date)?;

    let daily = engine.daily_pass(date)?;
    let weekly = engine.weekly_pass()?;

    Ok(RunReport {
        run_id,
        date: DateKey::new(date),
        driver: driver.kind(),
        backup_path,
        daily,
        weekly,
    })
}

/// Create `{root}/daily/{date}/` and fill it with the driver. An existing
/// directory for that date is never overwritten.
pub fn produce_backup(
    config: &Config,
    driver: &dyn BackupDriver,
    date: NaiveDate,
) -> Result<PathBuf> {
    let target = Catalog::new(&config.backups_root).set_path(Tier::Daily, DateKey::new(date));
    if target.exists() {
        return Err(Error::BackupExists(target.display().to_string()).into());
    }
    fs::DirBuilder::new().mode(DIR_MODE).create(&target)?;

    driver.produce(&target)?;
    if config.apply_log {
        driver.apply_log(&target, &config.apply_log_memory_budget)?;
    }

    info!(path = %target.display(), "backup produced");
    Ok(target)
}
