use std::path::PathBuf;

use thiserror::Error;

pub mod backup;
pub mod cli;
pub mod config;
pub mod lock;
pub mod logging;
pub mod preflight;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("lock {} is held by another run ({holder}); another instance is working on this backups root", .path.display())]
    LockHeld { path: PathBuf, holder: String },
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    #[error("{command} exited with status {status}; output:\n{output}")]
    Driver {
        command: String,
        status: String,
        output: String,
    },
    #[error("refusing to overwrite existing backup folder {0}")]
    BackupExists(String),
    #[error("cannot read backup tier directory {path}: {reason}")]
    Catalog { path: String, reason: String },
    #[error("invalid tier transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("failed to promote {date_key} from {from} to {to}: {reason}")]
    Promotion {
        date_key: String,
        from: String,
        to: String,
        reason: String,
    },
    #[error("refusing to prune {path}: not within backups root {root}")]
    UnsafePrune { path: String, root: String },
    #[error("missing backup: {0}")]
    MissingBackup(String),
    #[error("path not writable: {0}")]
    NotWritable(String),
    #[error("unknown backup tier: {0}")]
    InvalidTier(String),
    #[error("invalid date key {0}; expected YYYY-MM-DD")]
    InvalidDateKey(String),
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Environment checks that abort a run before anything is produced or removed.
#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("backups root {0} does not exist")]
    BackupsRootMissing(String),
    #[error("cannot write to backups root {0}, please check permissions")]
    BackupsRootNotWritable(String),
    #[error("disk space likely not enough to hold next backup: required {required} bytes, available {available} bytes")]
    InsufficientSpace { required: u64, available: u64 },
    #[error("connection parameters file {0} does not exist")]
    CredentialsMissing(String),
    #[error("cannot read connection parameters from {0}, please check permissions")]
    CredentialsUnreadable(String),
    #[error("the database server is not running ({command} failed)")]
    ServerNotRunning { command: String },
    #[error("invalid database credentials (server pid {pid}): {command}")]
    InvalidCredentials { pid: String, command: String },
    #[error("cannot find {name} executable, or not allowed to run it ({path})")]
    ExecutableMissing { name: String, path: String },
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    logging::init_logging(cli_args.log_format)?;
    cli::dispatch(cli_args)
}
