//! Retention sweep configuration.
//!
//! # Example
//!
//! ```toml
//! [sweep]
//! enabled = true
//! interval_secs = 300
//!
//! [sweep.safety]
//! dry_run = false
//! confirm_deletes = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Periodic retention sweep configuration.
///
/// When enabled, `serve` runs a background worker that walks every managed
/// database and deletes backups no longer required by its policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Whether the background sweep runs.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps.
    /// Default: 300 (every 5 minutes)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Safety settings to prevent accidental data loss.
    #[serde(default)]
    pub safety: SweepSafety,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            safety: SweepSafety::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

/// Safety settings for sweep deletions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSafety {
    /// If true, log what would be deleted without invoking the backup tool
    /// or touching the catalog.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Only remove a catalog row (and announce the removal) once the backup
    /// tool reports the physical deletion succeeded. Failed deletions are
    /// retried by the next sweep.
    ///
    /// When false, rows are removed whatever the tool reports.
    /// Default: true
    #[serde(default = "default_true")]
    pub confirm_deletes: bool,
}

impl Default for SweepSafety {
    fn default() -> Self {
        Self {
            dry_run: false,
            confirm_deletes: true,
        }
    }
}

impl SweepConfig {
    /// Get the interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep.interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
