use std::path::PathBuf;

use anyhow::{Context, Result};
use casesync_storage::PgProcessStore;
use casesync_sync::{pipeline_from_config, SyncConfig, SyncOptions, SyncTrigger};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "casesync")]
#[command(about = "Court process synchronization against the Judit API")]
struct Cli {
    /// Log filter directive, e.g. `info` or `casesync_sync=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server (and the monitoring scheduler when enabled).
    Serve,
    Migrate,
    /// Sync one tracked process now.
    Sync {
        process_id: Uuid,
        /// Pay for a fresh search instead of reusing a shared request id.
        #[arg(long)]
        force_new: bool,
    },
    /// Sync every monitored process once per case number.
    SyncMonitored,
    /// Import case numbers, one per line.
    Import {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        monitor: bool,
    },
    Tracking { process_id: Uuid },
    /// Archive a process; its movements stay, syncing stops.
    Archive { process_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = SyncConfig::from_env();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => casesync_web::serve_from_env().await?,
        Commands::Migrate => {
            let store = PgProcessStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Sync {
            process_id,
            force_new,
        } => {
            let pipeline = pipeline_from_config(&config).await?;
            let outcome = pipeline
                .sync_process(
                    process_id,
                    SyncOptions {
                        trigger: SyncTrigger::Manual,
                        force_new_request: force_new,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::SyncMonitored => {
            let pipeline = pipeline_from_config(&config).await?;
            let summary = pipeline.sync_monitored().await?;
            println!(
                "sweep complete: groups={} synced={} inserted={} failed={}",
                summary.groups,
                summary.synced,
                summary.inserted,
                summary.failed.len()
            );
            for (process_id, error) in &summary.failed {
                eprintln!("  {process_id}: {error}");
            }
        }
        Commands::Import {
            tenant,
            file,
            monitor,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let pipeline = pipeline_from_config(&config).await?;
            let created = pipeline.bulk_import(tenant, text.lines(), monitor).await?;
            println!("imported {} process(es)", created.len());
        }
        Commands::Tracking { process_id } => {
            let pipeline = pipeline_from_config(&config).await?;
            let record = pipeline.tracking_status(process_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Archive { process_id } => {
            let pipeline = pipeline_from_config(&config).await?;
            pipeline.archive_process(process_id).await?;
            println!("archived {process_id}");
        }
    }

    Ok(())
}
