pub mod check_config;
pub mod health;
pub mod pending;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use bridge_core::BridgeConfig;

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// YAML config file layered under the environment.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,
}

impl GlobalArgs {
    /// Defaults, then the config file, then the environment.
    pub fn load_config(&self) -> Result<BridgeConfig> {
        match &self.env_file {
            Some(path) => {
                dotenvy::from_path(path)
                    .with_context(|| format!("failed to load env file {}", path.display()))?;
            }
            None => {
                // A missing ./.env is normal.
                dotenvy::dotenv().ok();
            }
        }
        BridgeConfig::load(self.config.as_deref()).context("failed to load configuration")
    }
}
