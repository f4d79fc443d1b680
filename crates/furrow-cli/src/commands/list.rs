use chrono::Utc;

use crate::commands::common::{
    format_record_lines, normalize_record_identifier, parse_table, print_json, resolve_record,
    Context,
};
use crate::error::CliError;

pub async fn run_list(
    table: &str,
    limit: usize,
    offset: usize,
    ctx: &Context,
) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let store = ctx.open_store().await?;
    let records = store.list_records_page(table, limit, offset).await?;

    if ctx.json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No {table} records.");
        return Ok(());
    }
    for line in format_record_lines(table, &records, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_show(table: &str, id: &str, ctx: &Context) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let query = normalize_record_identifier(id)?;
    let store = ctx.open_store().await?;
    let record = resolve_record(&store, table, &query).await?;
    print_json(&record)
}
