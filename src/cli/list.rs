//! Implementation of `dbrotate list`.

use clap::Args;

use crate::{
    backup::{Catalog, CatalogSnapshot, Tier},
    cli::{ConfigArgs, OutputFormat},
    Result,
};

#[derive(Debug, Clone, Args, Default)]
pub struct ListArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

pub fn execute(args: ListArgs) -> Result<()> {
    let config = args.config.load()?;
    let snapshot = Catalog::new(&config.backups_root).list_all()?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Text => print!("{}", format_text(&snapshot)),
    }
    Ok(())
}

pub fn format_text(snapshot: &CatalogSnapshot) -> String {
    let mut out = String::new();
    for tier in Tier::ALL {
        let keys = snapshot.get(tier);
        out.push_str(&format!("{tier} ({}):\n", keys.len()));
        for key in keys {
            out.push_str(&format!("  {key}\n"));
        }
    }
    out
}
