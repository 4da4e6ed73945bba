//! Logging initialization using `tracing` and `tracing-subscriber`.

use clap::ValueEnum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

use crate::{backup::RetentionOutcome, cli::run::RunReport, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Initialize global tracing subscriber. Safe to call multiple times; subsequent
/// calls will no-op.
pub fn init_logging(format: LogFormat) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Human => {
            let _ = builder.finish().try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().finish().try_init();
        }
    };

    Ok(())
}

/// Emit one structured event summarising a finished run.
pub fn log_run_summary(report: &RunReport) {
    let daily = describe(&report.daily);
    let weekly = describe(&report.weekly);

    if matches!(report.daily, RetentionOutcome::Missed { .. }) {
        warn!(
            target = "dbrotate::run",
            run_id = %report.run_id,
            date = %report.date,
            driver = %report.driver,
            backup = %report.backup_path.display(),
            daily = %daily,
            weekly = %weekly,
            "run_completed_with_missing_weekly_candidate"
        );
    } else {
        info!(
            target = "dbrotate::run",
            run_id = %report.run_id,
            date = %report.date,
            driver = %report.driver,
            backup = %report.backup_path.display(),
            daily = %daily,
            weekly = %weekly,
            "run_completed"
        );
    }
}

pub fn describe(outcome: &RetentionOutcome) -> String {
    match outcome {
        RetentionOutcome::Promoted { date_key, from, to } => {
            format!("promoted {date_key} {from}->{to}")
        }
        RetentionOutcome::Pruned { date_key, tier } => format!("pruned {tier}/{date_key}"),
        RetentionOutcome::Missed { date_key } => format!("missed {date_key}"),
        RetentionOutcome::Untouched => "untouched".into(),
    }
}
