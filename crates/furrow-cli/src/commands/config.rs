use furrow_core::config::ClientConfig;
use furrow_core::util::normalize_text_option;
use serde::Serialize;

use crate::cli::ConfigCommands;
use crate::commands::common::{print_json, Context};
use crate::error::CliError;

/// Config as printed by `furrow config show`; the API key is masked.
#[derive(Debug, Serialize)]
pub struct ConfigView {
    pub config_path: String,
    pub db_path: String,
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    pub sync_interval_secs: u64,
}

impl ConfigView {
    pub fn new(ctx: &Context) -> Self {
        Self {
            config_path: ctx.config_path.display().to_string(),
            db_path: ctx.db_path.display().to_string(),
            remote_url: ctx.config.remote_url.clone(),
            api_key: ctx.config.api_key.as_deref().map(mask_secret),
            sync_interval_secs: ctx.config.sync_config().sync_interval.as_secs(),
        }
    }
}

pub async fn run_config(command: ConfigCommands, ctx: &Context) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            let view = ConfigView::new(ctx);
            if ctx.json {
                return print_json(&view);
            }
            println!("config:   {}", view.config_path);
            println!("database: {}", view.db_path);
            println!(
                "remote:   {}",
                view.remote_url.as_deref().unwrap_or("(not configured)")
            );
            println!("api key:  {}", view.api_key.as_deref().unwrap_or("(none)"));
            println!("interval: {}s", view.sync_interval_secs);
        }
        ConfigCommands::Path => println!("{}", ctx.config_path.display()),
        ConfigCommands::Set {
            remote_url,
            api_key,
            db_path,
            sync_interval_secs,
        } => {
            let updated = apply_config_updates(
                ctx.file_config.clone(),
                remote_url,
                api_key,
                db_path,
                sync_interval_secs,
            )?;
            updated.save_to_path(&ctx.config_path)?;
            println!("Saved {}", ctx.config_path.display());
        }
    }
    Ok(())
}

/// Merge explicit values into `config`, rejecting an unusable remote URL
/// before anything is written.
pub fn apply_config_updates(
    mut config: ClientConfig,
    remote_url: Option<String>,
    api_key: Option<String>,
    db_path: Option<String>,
    sync_interval_secs: Option<u64>,
) -> Result<ClientConfig, CliError> {
    if let Some(url) = normalize_text_option(remote_url) {
        config.remote_url = Some(url);
    }
    if let Some(key) = normalize_text_option(api_key) {
        config.api_key = Some(key);
    }
    if let Some(path) = normalize_text_option(db_path) {
        config.db_path = Some(path);
    }
    if let Some(secs) = sync_interval_secs {
        if secs == 0 {
            return Err(CliError::Config(
                "sync interval must be at least one second".to_string(),
            ));
        }
        config.sync_interval_secs = Some(secs);
    }

    config
        .remote_url()
        .map_err(|error| CliError::Config(error.to_string()))?;
    Ok(config)
}

pub fn mask_secret(secret: &str) -> String {
    let visible = secret.chars().take(4).collect::<String>();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
