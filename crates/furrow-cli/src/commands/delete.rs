use furrow_core::models::record_key;

use crate::commands::common::{normalize_record_identifier, parse_table, resolve_record, Context};
use crate::error::CliError;

pub async fn run_delete(table: &str, id: &str, ctx: &Context) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let query = normalize_record_identifier(id)?;
    let farm = ctx.open_farm().await?;
    let record = resolve_record(farm.store(), table, &query).await?;
    let key = record_key(table, &record)
        .unwrap_or(query.as_str())
        .to_string();

    farm.delete_entity(table, &key).await?;
    println!("{key}");
    Ok(())
}
