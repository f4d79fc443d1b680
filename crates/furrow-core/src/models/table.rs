//! Catalog of local tables and the remote resources they sync to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Local entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Fields,
    Stocks,
    Animals,
    Machines,
    Transactions,
    Tasks,
    Notifications,
    Users,
    AnimalBatches,
    Harvests,
    Feed,
}

impl Table {
    pub const ALL: [Self; 11] = [
        Self::Fields,
        Self::Stocks,
        Self::Animals,
        Self::Machines,
        Self::Transactions,
        Self::Tasks,
        Self::Notifications,
        Self::Users,
        Self::AnimalBatches,
        Self::Harvests,
        Self::Feed,
    ];

    /// `SQLite` table name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fields => "fields",
            Self::Stocks => "stocks",
            Self::Animals => "animals",
            Self::Machines => "machines",
            Self::Transactions => "transactions",
            Self::Tasks => "tasks",
            Self::Notifications => "notifications",
            Self::Users => "users",
            Self::AnimalBatches => "animal_batches",
            Self::Harvests => "harvests",
            Self::Feed => "feed",
        }
    }

    /// Record key holding the primary key.
    pub const fn key_field(self) -> &'static str {
        match self {
            Self::Harvests => "batchId",
            _ => "id",
        }
    }

    /// Primary key column in the `SQLite` table.
    pub const fn key_column(self) -> &'static str {
        match self {
            Self::Harvests => "batch_id",
            _ => "id",
        }
    }

    /// Noun used in queue operation tags (`ADD_FIELD`, `UPDATE_ANIMAL_BATCH`).
    pub const fn operation_noun(self) -> &'static str {
        match self {
            Self::Fields => "FIELD",
            Self::Stocks => "STOCK",
            Self::Animals => "ANIMAL",
            Self::Machines => "MACHINE",
            Self::Transactions => "TRANSACTION",
            Self::Tasks => "TASK",
            Self::Notifications => "NOTIFICATION",
            Self::Users => "USER",
            Self::AnimalBatches => "ANIMAL_BATCH",
            Self::Harvests => "HARVEST",
            Self::Feed => "FEED",
        }
    }

    /// Remote resource this table syncs to. `None` means local only.
    pub const fn resource(self) -> Option<Resource> {
        match self {
            Self::Fields => Some(Resource::Fields),
            Self::Stocks => Some(Resource::Stocks),
            Self::Animals => Some(Resource::Animals),
            Self::Machines => Some(Resource::Machines),
            Self::Transactions => Some(Resource::Transactions),
            Self::Tasks => Some(Resource::Tasks),
            Self::Users => Some(Resource::Users),
            Self::AnimalBatches => Some(Resource::AnimalBatches),
            Self::Feed => Some(Resource::Feed),
            Self::Notifications | Self::Harvests => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|table| table.name().replace('_', "") == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown table '{value}'")))
    }
}

/// Remote collection accepting upserts keyed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Fields,
    Animals,
    Machines,
    Stocks,
    Transactions,
    Tasks,
    Users,
    Feed,
    AnimalBatches,
}

impl Resource {
    pub const ALL: [Self; 9] = [
        Self::Fields,
        Self::Animals,
        Self::Machines,
        Self::Stocks,
        Self::Transactions,
        Self::Tasks,
        Self::Users,
        Self::Feed,
        Self::AnimalBatches,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Fields => "fields",
            Self::Animals => "animals",
            Self::Machines => "machines",
            Self::Stocks => "stocks",
            Self::Transactions => "transactions",
            Self::Tasks => "tasks",
            Self::Users => "users",
            Self::Feed => "feed",
            Self::AnimalBatches => "animal_batches",
        }
    }

    /// Local table receiving remote rows of this resource.
    pub const fn table(self) -> Table {
        match self {
            Self::Fields => Table::Fields,
            Self::Animals => Table::Animals,
            Self::Machines => Table::Machines,
            Self::Stocks => Table::Stocks,
            Self::Transactions => Table::Transactions,
            Self::Tasks => Table::Tasks,
            Self::Users => Table::Users,
            Self::Feed => Table::Feed,
            Self::AnimalBatches => Table::AnimalBatches,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_table_names_in_either_case_style() {
        assert_eq!("fields".parse::<Table>().unwrap(), Table::Fields);
        assert_eq!("animalBatches".parse::<Table>().unwrap(), Table::AnimalBatches);
        assert_eq!("animal_batches".parse::<Table>().unwrap(), Table::AnimalBatches);
        assert!("barns".parse::<Table>().is_err());
    }

    #[test]
    fn every_resource_maps_back_to_its_table() {
        for resource in Resource::ALL {
            assert_eq!(resource.table().resource(), Some(resource));
        }
    }

    #[test]
    fn harvests_are_keyed_by_batch_id() {
        assert_eq!(Table::Harvests.key_field(), "batchId");
        assert_eq!(Table::Harvests.key_column(), "batch_id");
        assert_eq!(Table::Harvests.resource(), None);
    }
}
