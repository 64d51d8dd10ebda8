//! `github-bridge run` — foreground service.

use anyhow::{Context, Result};
use clap::Args;

use bridge_daemon::start_blocking;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Resolve and log changes without cloning, committing or pushing.
    #[arg(long)]
    pub dry_run: bool,

    /// Tail the intent change feed instead of polling.
    #[arg(long)]
    pub use_feed: bool,
}

impl RunArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let mut config = global.load_config()?;
        config.dry_run |= self.dry_run;
        config.use_feed |= self.use_feed;
        config.validate().context("invalid configuration")?;

        start_blocking(config).context("bridge exited with error")
    }
}
