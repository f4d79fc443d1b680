use furrow_core::services::{BatchAction, HarvestRequest, SaleRequest};

use crate::cli::{BatchCommands, Switch};
use crate::commands::common::{normalize_record_identifier, print_json, short_id, Context};
use crate::error::CliError;

pub async fn run_irrigate(field_id: &str, state: Switch, ctx: &Context) -> Result<(), CliError> {
    let field_id = normalize_record_identifier(field_id)?;
    let farm = ctx.open_farm().await?;
    let field = farm.toggle_irrigation(&field_id, state.is_on()).await?;

    if ctx.json {
        return print_json(&field);
    }
    let state = if field.irrigation_active { "on" } else { "off" };
    println!("Irrigation {state} for {}", field.name);
    Ok(())
}

pub async fn run_sale(request: SaleRequest, ctx: &Context) -> Result<(), CliError> {
    let farm = ctx.open_farm().await?;
    let transaction = farm.register_sale(request).await?;

    if ctx.json {
        return print_json(&transaction);
    }
    println!(
        "{}  {:.2}  {}",
        short_id(&transaction.id),
        transaction.amount,
        transaction.description
    );
    Ok(())
}

pub async fn run_harvest(request: HarvestRequest, ctx: &Context) -> Result<(), CliError> {
    let farm = ctx.open_farm().await?;
    let batch = farm.harvest_field(request).await?;

    if ctx.json {
        return print_json(&batch);
    }
    println!(
        "{}  {} {} of {}",
        short_id(&batch.batch_id),
        batch.quantity,
        batch.unit,
        batch.crop
    );
    Ok(())
}

pub async fn run_batch(
    batch_id: &str,
    command: BatchCommands,
    ctx: &Context,
) -> Result<(), CliError> {
    let batch_id = normalize_record_identifier(batch_id)?;
    let action = match command {
        BatchCommands::Vaccinate { vaccine } => BatchAction::Vaccinate { vaccine },
        BatchCommands::Move { location } => BatchAction::Move { location },
        BatchCommands::Feed { stock_id, quantity } => BatchAction::Feed {
            stock_id,
            quantity_per_animal: quantity,
        },
    };

    let farm = ctx.open_farm().await?;
    let updated = farm.apply_batch_action(&batch_id, action).await?;
    println!("Updated {updated} animal(s)");
    Ok(())
}
