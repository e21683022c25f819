use anyhow::{bail, Result};
use beacon::aggregation::Aggregator;
use beacon::config::Config;
use beacon::models::LegacyCounts;
use beacon::storage::{self, CounterStore};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "beacon-admin")]
#[command(about = "Beacon counter management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the legacy (imported) counters of an object
    Backfill {
        /// Object id
        object_id: String,
        /// Visits carried over from the earlier scheme
        #[arg(long)]
        visits: i64,
        /// Uniques carried over from the earlier scheme
        #[arg(long)]
        uniques: i64,
    },
    /// Show the effective counters of an object
    Show {
        /// Object id
        object_id: String,
    },
    /// Show the combined counters of several objects
    ShowMany {
        /// Object ids (repeat an id to weight it)
        #[arg(required = true)]
        object_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = storage::connect(&config.database).await?;

    // Ensure database is initialized
    store.init().await?;

    let aggregator = Aggregator::new(Arc::clone(&store), config.tracking.store_timeout());

    match cli.command {
        Commands::Backfill {
            object_id,
            visits,
            uniques,
        } => {
            if visits < 0 || uniques < 0 {
                bail!("visits and uniques must be non-negative");
            }
            store
                .backfill(&object_id, LegacyCounts { visits, uniques })
                .await?;
            println!(
                "✅ Backfilled {} (visits: {}, uniques: {})",
                object_id, visits, uniques
            );
        }
        Commands::Show { object_id } => {
            let counts = aggregator.object(&object_id).await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Commands::ShowMany { object_ids } => {
            let counts = aggregator.objects(&object_ids).await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}
