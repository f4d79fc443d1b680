use furrow_core::models::record_key;

use crate::commands::common::{parse_table, print_json, resolve_record_input, Context};
use crate::error::CliError;

pub async fn run_add(table: &str, json: Option<&str>, ctx: &Context) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let record = resolve_record_input(json, "{\n}\n")?;

    let farm = ctx.open_farm().await?;
    let saved = farm.add_entity(table, record).await?;

    if ctx.json {
        print_json(&saved)?;
    } else {
        println!("{}", record_key(table, &saved).unwrap_or_default());
    }
    Ok(())
}
