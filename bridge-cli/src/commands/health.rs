//! `github-bridge health` — probe a running bridge.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Health endpoint to probe. Defaults to localhost on `METRICS_PORT`.
    #[arg(long)]
    pub url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,
}

impl HealthArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let url = match self.url {
            Some(url) => url,
            None => {
                let config = global.load_config()?;
                format!("http://127.0.0.1:{}/health", config.metrics_port)
            }
        };

        let response = ureq::get(&url)
            .timeout(Duration::from_secs(self.timeout))
            .call();
        match response {
            Ok(response) => {
                let body = response
                    .into_string()
                    .context("failed to read health response")?;
                println!("{} {url}: {}", "healthy".green().bold(), body.trim());
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => {
                println!("{} {url}: HTTP {code}", "unhealthy".red().bold());
                bail!("health check returned HTTP {code}")
            }
            Err(err) => {
                println!("{} {url}", "unreachable".red().bold());
                Err(err).context("health check failed")
            }
        }
    }
}
