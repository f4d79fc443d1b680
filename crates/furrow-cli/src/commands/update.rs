use furrow_core::models::{record_key, Record};

use crate::commands::common::{
    normalize_record_identifier, parse_table, print_json, resolve_record, resolve_record_input,
    Context,
};
use crate::error::CliError;

pub async fn run_update(
    table: &str,
    id: &str,
    json: Option<&str>,
    ctx: &Context,
) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let query = normalize_record_identifier(id)?;
    let farm = ctx.open_farm().await?;
    let current = resolve_record(farm.store(), table, &query).await?;
    let key = record_key(table, &current)
        .unwrap_or(query.as_str())
        .to_string();

    let initial = serde_json::to_string_pretty(&current)?;
    let updates = resolve_record_input(json, &initial)?;
    if changed_fields(&current, &updates).is_empty() {
        println!("{key}");
        return Ok(());
    }

    let updated = farm.update_entity(table, &key, updates).await?;
    if ctx.json {
        print_json(&updated)?;
    } else {
        println!("{key}");
    }
    Ok(())
}

/// Keys in `updates` whose value differs from `current`.
pub fn changed_fields<'a>(current: &Record, updates: &'a Record) -> Vec<&'a str> {
    updates
        .iter()
        .filter(|(key, value)| current.get(key.as_str()) != Some(*value))
        .map(|(key, _)| key.as_str())
        .collect()
}
