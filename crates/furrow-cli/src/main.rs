//! Furrow CLI - drive the offline-first farm store from a terminal
//!
//! Every mutation lands in the local store and the outbound queue first;
//! `furrow sync` and `furrow watch` talk to the remote.

mod cli;
mod commands;
mod error;
mod remote;

use clap::Parser;
use furrow_core::config::ClientConfig;
use furrow_core::services::{HarvestRequest, SaleRequest};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_config_path, resolve_db_path, Context};
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::farm::{run_batch, run_harvest, run_irrigate, run_sale};
use crate::commands::list::{run_list, run_show};
use crate::commands::queue::{run_queue, run_requeue};
use crate::commands::stress::run_stress;
use crate::commands::sync::{run_conflicts, run_resolve, run_sync, run_watch};
use crate::commands::tiles::run_tiles;
use crate::commands::update::run_update;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("furrow=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = build_context(&cli)?;

    match cli.command {
        Commands::Add { table, json } => run_add(&table, json.as_deref(), &ctx).await?,
        Commands::Update { table, id, json } => {
            run_update(&table, &id, json.as_deref(), &ctx).await?;
        }
        Commands::Delete { table, id } => run_delete(&table, &id, &ctx).await?,
        Commands::List {
            table,
            limit,
            offset,
        } => run_list(&table, limit, offset, &ctx).await?,
        Commands::Show { table, id } => run_show(&table, &id, &ctx).await?,
        Commands::Queue => run_queue(&ctx).await?,
        Commands::Requeue => run_requeue(&ctx).await?,
        Commands::Sync { push_only } => run_sync(push_only, &ctx).await?,
        Commands::Watch { interval } => run_watch(interval, &ctx).await?,
        Commands::Conflicts { resolved, limit } => run_conflicts(resolved, limit, &ctx).await?,
        Commands::Resolve { id, keep } => run_resolve(&id, keep.into(), &ctx).await?,
        Commands::Irrigate { field_id, state } => run_irrigate(&field_id, state, &ctx).await?,
        Commands::Sale {
            stock_id,
            quantity,
            price,
            buyer,
        } => {
            let request = SaleRequest {
                stock_id,
                quantity,
                unit_price: price,
                buyer,
            };
            run_sale(request, &ctx).await?;
        }
        Commands::Harvest {
            field_id,
            quantity,
            unit,
        } => {
            let request = HarvestRequest {
                field_id,
                quantity,
                unit,
            };
            run_harvest(request, &ctx).await?;
        }
        Commands::Batch { batch_id, action } => run_batch(&batch_id, action, &ctx).await?,
        Commands::Stress { command } => run_stress(command, &ctx).await?,
        Commands::Tiles { command } => run_tiles(command, &ctx).await?,
        Commands::Config { command } => run_config(command, &ctx).await?,
    }

    Ok(())
}

fn build_context(cli: &Cli) -> Result<Context, CliError> {
    let config_path = resolve_config_path(cli.config.clone())?;
    let file_config = ClientConfig::load_from_path(&config_path)?;
    let config = file_config.clone().with_env_overrides();
    let db_path = resolve_db_path(cli.db_path.clone(), &config)?;

    Ok(Context {
        db_path,
        config_path,
        file_config,
        config,
        json: cli.json,
    })
}
