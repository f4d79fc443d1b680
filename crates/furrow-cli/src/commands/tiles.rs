use chrono::Duration;
use furrow_core::services::TileCache;

use crate::cli::TileCommands;
use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_tiles(command: TileCommands, ctx: &Context) -> Result<(), CliError> {
    let cache = TileCache::new(ctx.open_store().await?);

    match command {
        TileCommands::Evict { days } => {
            if days < 0 {
                return Err(CliError::Config("--days must not be negative".to_string()));
            }
            let evicted = cache.evict_older_than(Duration::days(days)).await?;
            println!("Evicted {evicted} tile(s)");
        }
        TileCommands::Clear => {
            let cleared = cache.clear().await?;
            println!("Cleared {cleared} tile(s)");
        }
        TileCommands::Count => println!("{}", cache.count().await?),
    }
    Ok(())
}
