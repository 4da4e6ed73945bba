//! Command-line surface; subcommands live here.

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

use crate::{backup::DriverKind, config::Config, logging::LogFormat, Error, Result};

pub mod check;
pub mod list;
pub mod run;

#[derive(Debug, Clone)]
pub enum Command {
    Run(run::RunArgs),
    List(list::ListArgs),
    Check(check::CheckArgs),
    None,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
    pub log_format: LogFormat,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            command: Command::None,
            log_format: LogFormat::Human,
        }
    }
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(r) => run::execute(r),
        Command::List(l) => list::execute(l),
        Command::Check(c) => check::execute(c),
        Command::None => Ok(()),
    }
}

/// Output format for reports printed to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Options shared by every subcommand that needs a configuration.
#[derive(Debug, Clone, Args, Default)]
pub struct ConfigArgs {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Override the backups root directory
    #[arg(short = 'B', long = "backups-root")]
    pub backups_root: Option<PathBuf>,

    /// Override the backup driver
    #[arg(long = "driver", value_enum)]
    pub driver: Option<DriverKind>,
}

impl ConfigArgs {
    /// Load the configuration file (or defaults) and apply CLI overrides.
    pub fn load(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(root) = &self.backups_root {
            config.backups_root = root.clone();
        }
        if let Some(driver) = self.driver {
            config.driver = driver;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "dbrotate",
    version,
    about = "Daily database backups with weekly and monthly rotation"
)]
struct Cli {
    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "human", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Take today's backup, then rotate the daily and weekly tiers.
    Run(run::RunArgs),
    /// Print the backup sets present in each tier.
    List(list::ListArgs),
    /// Acquire the lock and run the preflight checks only.
    Check(check::CheckArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        // --help and --version are not failures
        Err(err) if !err.use_stderr() => {
            err.print()?;
            return Ok(CliArgs::default());
        }
        Err(err) => return Err(Error::Cli(err.to_string()).into()),
    };
    let command = match cli.command {
        Some(Subcommands::Run(args)) => Command::Run(args),
        Some(Subcommands::List(args)) => Command::List(args),
        Some(Subcommands::Check(args)) => Command::Check(args),
        None => Command::None,
    };

    Ok(CliArgs {
        command,
        log_format: cli.log_format,
    })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
