use serde::{Deserialize, Serialize};

/// Calendar unit for the rolling retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionUnit {
    Day,
    Week,
    Month,
}

/// Baseline retention rule for a database: a redundancy floor plus a rolling
/// time window. Zero disables either rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    /// Number of most recent `nokeep` backups that are never deleted.
    #[serde(default)]
    pub minimum_redundancy: u32,

    /// Length of the retention window in `retention_units`.
    #[serde(default)]
    pub retention: u32,

    #[serde(default = "default_retention_units")]
    pub retention_units: RetentionUnit,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            minimum_redundancy: 2,
            retention: 2,
            retention_units: RetentionUnit::Week,
        }
    }
}

fn default_retention_units() -> RetentionUnit {
    RetentionUnit::Week
}

impl RetentionPolicy {
    pub fn has_redundancy_floor(&self) -> bool {
        self.minimum_redundancy > 0
    }

    pub fn has_time_window(&self) -> bool {
        self.retention > 0
    }
}
