//! Implementation of `dbrotate check`.

use clap::Args;
use tracing::warn;
use uuid::Uuid;

use crate::{cli::ConfigArgs, config::Config, lock::RunLock, preflight::PreflightChecker, Result};

#[derive(Debug, Clone, Args, Default)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn execute(args: CheckArgs) -> Result<()> {
    let config = args.config.load()?;
    check(&config)?;
    println!("preflight ok: {}", config.backups_root.display());
    Ok(())
}

/// Run the preflight checks under the run lock without producing anything.
pub fn check(config: &Config) -> Result<()> {
    let driver = config.driver.build(config);
    let lock = RunLock::new(&config.backups_root);
    let handle = lock.acquire(Uuid::new_v4())?;

    let outcome = PreflightChecker::new(config, driver.as_ref()).run();
    let released = lock.release(handle);

    match (outcome, released) {
        (Ok(()), released) => released,
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            warn!(error = %release_err, "failed to release lock after failed check");
            Err(err)
        }
    }
}
