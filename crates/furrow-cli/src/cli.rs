use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use furrow_core::models::ConflictChoice;

#[derive(Parser)]
#[command(name = "furrow")]
#[command(about = "Offline-first farm records from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output as JSON where a command lists or shows data
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a record and queue it for sync
    #[command(alias = "new")]
    Add {
        /// Table name (fields, animals, stocks, ...)
        table: String,
        /// Record JSON; read from stdin or $EDITOR when omitted
        json: Option<String>,
    },
    /// Merge changes into an existing record
    #[command(alias = "edit")]
    Update {
        table: String,
        /// Record ID or unique ID prefix
        id: String,
        /// Partial record JSON; opens $EDITOR on the current record when omitted
        json: Option<String>,
    },
    /// Delete a record and queue the removal
    Delete {
        table: String,
        /// Record ID or unique ID prefix
        id: String,
    },
    /// List records of a table
    List {
        table: String,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Records to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Print one record
    Show {
        table: String,
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Inspect the outbound queue
    Queue,
    /// Put dead queue rows back into the retry cycle
    Requeue,
    /// Push queued changes, then pull remote changes
    Sync {
        /// Skip the pull after pushing
        #[arg(long)]
        push_only: bool,
    },
    /// Run the sync loop until interrupted
    Watch {
        /// Seconds between cycles (overrides config)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// List open sync conflicts
    Conflicts {
        /// Show recently settled conflicts instead
        #[arg(long)]
        resolved: bool,
        /// Number of settled conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Settle an open conflict
    Resolve {
        /// Entity ID of the conflict
        id: String,
        /// Which copy survives
        #[arg(long, value_enum)]
        keep: KeepSide,
    },
    /// Turn irrigation of a field on or off
    Irrigate {
        field_id: String,
        #[arg(value_enum)]
        state: Switch,
    },
    /// Sell from stock and book the income
    Sale {
        stock_id: String,
        quantity: f64,
        /// Price per unit
        #[arg(long)]
        price: f64,
        #[arg(long)]
        buyer: Option<String>,
    },
    /// Harvest a field into stock
    Harvest {
        field_id: String,
        quantity: f64,
        #[arg(long, default_value = "kg")]
        unit: String,
    },
    /// Apply an action to every animal in a batch
    Batch {
        batch_id: String,
        #[command(subcommand)]
        action: BatchCommands,
    },
    /// Generate or remove synthetic load
    Stress {
        #[command(subcommand)]
        command: StressCommands,
    },
    /// Manage the map tile cache
    Tiles {
        #[command(subcommand)]
        command: TileCommands,
    },
    /// Show or edit the client config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepSide {
    Local,
    Remote,
}

impl From<KeepSide> for ConflictChoice {
    fn from(side: KeepSide) -> Self {
        match side {
            KeepSide::Local => Self::Local,
            KeepSide::Remote => Self::Remote,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Record a vaccination on every animal
    Vaccinate { vaccine: String },
    /// Move every animal to a location
    Move { location: String },
    /// Feed every animal from stock
    Feed {
        stock_id: String,
        /// Quantity per animal
        quantity: f64,
    },
}

#[derive(Subcommand)]
pub enum StressCommands {
    /// Insert synthetic animals in batches
    Insert {
        #[arg(default_value = "100000")]
        count: usize,
    },
    /// Delete every synthetic animal
    Clear,
}

#[derive(Subcommand)]
pub enum TileCommands {
    /// Drop tiles older than the given age
    Evict {
        /// Maximum age in days
        #[arg(long, default_value = "30")]
        days: i64,
    },
    /// Drop every cached tile
    Clear,
    /// Number of cached tiles
    Count,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective config
    Show,
    /// Print the config file location
    Path,
    /// Update values in the config file
    Set {
        /// Remote authority base URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Public API key of the remote project
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
        /// Local database path
        #[arg(long, value_name = "PATH")]
        db_path: Option<String>,
        /// Seconds between sync cycles
        #[arg(long, value_name = "SECS")]
        sync_interval_secs: Option<u64>,
    },
}
