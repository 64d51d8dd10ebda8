//! `github-bridge pending` — unprocessed push intents.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use bridge_core::PushIntent;
use bridge_store::{IntentStore, MongoStore};

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct PendingArgs {
    /// Maximum number of intents to list.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "author")]
    author: String,
    #[tabled(rename = "documents")]
    documents: usize,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "message")]
    message: String,
}

impl PendingArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;

        let intents = runtime.block_on(async {
            let store = MongoStore::connect(&config.mongodb_uri, &config.mongodb_database)
                .await
                .context("failed to connect to MongoDB")?;
            let intents = store
                .fetch_pending(self.limit)
                .await
                .context("failed to fetch pending push intents")?;
            if let Err(err) = store.close().await {
                eprintln!("warning: failed to close MongoDB client: {err}");
            }
            Ok::<_, anyhow::Error>(intents)
        })?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&intents).context("failed to render intents JSON")?
            );
            return Ok(());
        }
        print_table(intents);
        Ok(())
    }
}

fn print_table(intents: Vec<PushIntent>) {
    if intents.is_empty() {
        println!("No pending push intents.");
        return;
    }
    println!("{} pending push intent(s)", intents.len());

    let rows: Vec<PendingRow> = intents
        .into_iter()
        .map(|intent| PendingRow {
            id: intent.id.to_string(),
            branch: intent.branch,
            author: intent.author,
            documents: intent.documents.len(),
            created: intent.timestamp.to_rfc3339(),
            message: first_line(&intent.message),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}
