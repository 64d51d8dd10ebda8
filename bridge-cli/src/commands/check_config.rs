//! `github-bridge check-config` — validate and print the effective config.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {}

impl CheckConfigArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        config.validate().context("invalid configuration")?;

        println!(
            "{}",
            serde_json::to_string_pretty(&config.redacted_json())
                .context("failed to render config JSON")?
        );
        eprintln!("{} configuration is valid", "ok".green().bold());
        Ok(())
    }
}
