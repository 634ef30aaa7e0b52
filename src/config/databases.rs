//! Managed databases and the storage locations their backups are copied to.
//!
//! # Example
//!
//! ```toml
//! [locations.primary]
//! endpoint = "https://s3.eu-central-1.amazonaws.com"
//! bucket = "pg-backups"
//! prefix = "prod"
//!
//! [databases.orders]
//! name = "Orders"
//! backup_locations = ["primary"]
//!
//! [databases.orders.retention_policy]
//! minimum_redundancy = 2
//! retention = 2
//! retention_units = "week"
//!
//! [[databases.orders.archival_policies]]
//! retention = { duration = 1, units = "year" }
//! strategy = { type = "target_day", day_of_week = "Sun", occurrence = 1, occurrence_units = "month" }
//! ```

use serde::{Deserialize, Serialize};

use crate::models::{ArchivalPolicy, RetentionPolicy};

/// An S3-compatible bucket backups are written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageLocation {
    /// Endpoint URL handed to the backup tool.
    pub endpoint: String,

    pub bucket: String,

    /// Key prefix inside the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

impl StorageLocation {
    /// `s3://bucket[/prefix]`
    pub fn s3_path(&self) -> String {
        let bucket = self.bucket.trim_matches('/');
        match self
            .prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
        {
            Some(prefix) => format!("s3://{bucket}/{prefix}"),
            None => format!("s3://{bucket}"),
        }
    }
}

/// A database whose backups are managed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Location ids every backup of this database is copied to.
    #[serde(default)]
    pub backup_locations: Vec<String>,

    #[serde(default)]
    pub retention_policy: RetentionPolicy,

    /// Evaluated in order; the first unexpired match wins.
    #[serde(default)]
    pub archival_policies: Vec<ArchivalPolicy>,
}
