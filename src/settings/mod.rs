//! Runtime settings: the timezone, storage locations and managed databases
//! together with their retention and archival policies.
//!
//! Readers take one immutable [`Settings`] snapshot per operation, so a
//! decision or a sweep never observes a half-applied policy edit.

mod error;
mod store;

use std::collections::BTreeMap;

use chrono_tz::Tz;
pub use error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
pub use store::SettingsStore;

use crate::{
    config::{DatabaseConfig, KeeperConfig, StorageLocation, validate_databases},
    models::ArchivalPolicy,
};

/// One consistent view of everything the policy engine reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_timezone")]
    pub timezone: Tz,

    #[serde(default)]
    pub locations: BTreeMap<String, StorageLocation>,

    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            locations: BTreeMap::new(),
            databases: BTreeMap::new(),
        }
    }
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl Settings {
    pub fn from_config(config: &KeeperConfig) -> SettingsResult<Self> {
        let mut databases = config.databases.clone();
        for (db_id, db) in &mut databases {
            for (index, policy) in db.archival_policies.iter_mut().enumerate() {
                if policy.id.is_nil() {
                    policy.id = ArchivalPolicy::config_id(db_id, index);
                }
            }
        }

        Ok(Self {
            timezone: config.timezone()?,
            locations: config.locations.clone(),
            databases,
        })
    }

    pub fn database(&self, db_id: &str) -> Option<&DatabaseConfig> {
        self.databases.get(db_id)
    }

    pub fn location(&self, location_id: &str) -> Option<&StorageLocation> {
        self.locations.get(location_id)
    }

    /// The configured locations of a database, in configuration order.
    /// Ids without a matching location are skipped.
    pub fn locations_for(&self, db_id: &str) -> Vec<(&str, &StorageLocation)> {
        self.database(db_id)
            .map(|db| {
                db.backup_locations
                    .iter()
                    .filter_map(|id| self.location(id).map(|loc| (id.as_str(), loc)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn validate(&self) -> SettingsResult<()> {
        validate_databases(&self.databases, &self.locations)?;
        Ok(())
    }
}
