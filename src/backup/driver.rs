//! Backup drivers: the external tools that produce a daily backup set.
//!
//! A driver is selected with [`DriverKind`] and built from the run
//! configuration. Each driver knows its executable, how to probe the data
//! source and how to produce (and optionally post-process) a backup.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{config::Config, Error, PreflightError, Result};

/// Lines of captured tool output carried in a driver error.
const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Writes an empty marker file; for dry runs and tests.
    #[default]
    Test,
    /// Logical dump with mysqldump.
    Dump,
    /// Hot physical snapshot with innobackupex.
    Snapshot,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Test => "test",
            DriverKind::Dump => "dump",
            DriverKind::Snapshot => "snapshot",
        }
    }

    /// Build the driver for this kind from the run configuration.
    pub fn build(&self, config: &Config) -> Box<dyn BackupDriver> {
        match self {
            DriverKind::Test => Box::new(TestDriver),
            DriverKind::Dump => Box::new(DumpDriver {
                mysqldump: config.executables.dump_path(),
                server: ServerProbe::from_config(config),
            }),
            DriverKind::Snapshot => Box::new(SnapshotDriver {
                innobackupex: config.executables.snapshot_path(),
                server: ServerProbe::from_config(config),
            }),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait BackupDriver {
    fn kind(&self) -> DriverKind;

    /// Tool the driver needs on disk; `None` when it shells out to nothing.
    fn executable(&self) -> Option<(&'static str, &Path)>;

    /// Liveness probe against the data source.
    fn probe(&self) -> Result<()>;

    /// Write a backup into `target_dir`, which exists and is empty.
    fn produce(&self, target_dir: &Path) -> Result<()>;

    /// Post-process a produced backup so it can be restored directly.
    fn apply_log(&self, target_dir: &Path, memory_budget: &str) -> Result<()> {
        let _ = (target_dir, memory_budget);
        debug!(driver = %self.kind(), "driver has no log-apply step");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TestDriver;

impl BackupDriver for TestDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Test
    }

    fn executable(&self) -> Option<(&'static str, &Path)> {
        None
    }

    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn produce(&self, target_dir: &Path) -> Result<()> {
        File::create(target_dir.join("test.backup"))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DumpDriver {
    mysqldump: PathBuf,
    server: ServerProbe,
}

impl BackupDriver for DumpDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Dump
    }

    fn executable(&self) -> Option<(&'static str, &Path)> {
        Some(("mysqldump", self.mysqldump.as_path()))
    }

    fn probe(&self) -> Result<()> {
        self.server.ping()
    }

    fn produce(&self, target_dir: &Path) -> Result<()> {
        let output_file = target_dir.join("mysqldump.backup.output");
        let mut cmd = Command::new(&self.mysqldump);
        cmd.arg(defaults_file_arg(&self.server.credentials_file))
            .args([
                "--verbose",
                "--single-transaction",
                "--all-databases",
                "--events",
                "--triggers",
                "--comments",
                "--dump-date",
            ])
            .arg(format!("--log-error={}", output_file.display()))
            .arg(format!(
                "--result-file={}",
                target_dir.join("backup-dump.sql").display()
            ));
        run_captured(cmd, &output_file)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotDriver {
    innobackupex: PathBuf,
    server: ServerProbe,
}

impl BackupDriver for SnapshotDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Snapshot
    }

    fn executable(&self) -> Option<(&'static str, &Path)> {
        Some(("innobackupex", self.innobackupex.as_path()))
    }

    fn probe(&self) -> Result<()> {
        self.server.ping()
    }

    fn produce(&self, target_dir: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.innobackupex);
        cmd.arg(defaults_file_arg(&self.server.credentials_file))
            .arg("--no-timestamp")
            .arg(target_dir);
        run_captured(cmd, &target_dir.join("innobackupex.backup.output"))
    }

    fn apply_log(&self, target_dir: &Path, memory_budget: &str) -> Result<()> {
        let mut cmd = Command::new(&self.innobackupex);
        cmd.arg(defaults_file_arg(&self.server.credentials_file))
            .arg("--apply-log")
            .arg(format!("--use-memory={memory_budget}"))
            .arg(target_dir);
        run_captured(cmd, &target_dir.join("innobackupex.apply.output"))
    }
}

/// `mysqladmin ping`, falling back to `pgrep` to tell a stopped server from
/// bad credentials.
#[derive(Debug, Clone)]
pub struct ServerProbe {
    mysqladmin: PathBuf,
    credentials_file: PathBuf,
}

impl ServerProbe {
    fn from_config(config: &Config) -> Self {
        Self {
            mysqladmin: config.executables.admin_path(),
            credentials_file: config.credentials_file.clone(),
        }
    }

    fn ping(&self) -> Result<()> {
        let command = format!(
            "{} {} ping",
            self.mysqladmin.display(),
            defaults_file_arg(&self.credentials_file)
        );
        let pinged = Command::new(&self.mysqladmin)
            .arg(defaults_file_arg(&self.credentials_file))
            .arg("ping")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if pinged {
            debug!(command = %command, "database server answered ping");
            return Ok(());
        }

        let pgrep = Command::new("pgrep").args(["-x", "mysqld"]).output();
        match pgrep {
            Ok(output) if output.status.success() => {
                let pid = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                Err(Error::Preflight(PreflightError::InvalidCredentials { pid, command }).into())
            }
            _ => Err(Error::Preflight(PreflightError::ServerNotRunning { command }).into()),
        }
    }
}

fn defaults_file_arg(credentials_file: &Path) -> String {
    format!("--defaults-file={}", credentials_file.display())
}

/// Run `cmd` with stdout and stderr appended to `output_file`. A non-zero
/// exit becomes `Error::Driver` carrying the tail of that file.
fn run_captured(mut cmd: Command, output_file: &Path) -> Result<()> {
    let command = render_command(&cmd);
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_file)?;
    let log_err = log.try_clone()?;

    info!(command = %command, output = %output_file.display(), "running backup tool");
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()
        .map_err(|e| Error::Driver {
            command: command.clone(),
            status: "not started".into(),
            output: e.to_string(),
        })?;

    if !status.success() {
        let status = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "killed by signal".into());
        return Err(Error::Driver {
            command,
            status,
            output: tail_lines(output_file, OUTPUT_TAIL_LINES),
        }
        .into());
    }
    Ok(())
}

fn render_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn tail_lines(path: &Path, n: usize) -> String {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            lines[lines.len().saturating_sub(n)..].join("\n")
        }
        Err(_) => "<no output captured>".into(),
    }
}
