use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operator hold reported by the backup tool for one (backup, location) pair.
///
/// Orthogonal to policy-driven archival: only `NoKeep` backups are ever
/// candidates for retention deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepStatus {
    Standalone,
    Full,
    #[default]
    #[serde(rename = "nokeep")]
    NoKeep,
}

impl KeepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeepStatus::Standalone => "standalone",
            KeepStatus::Full => "full",
            KeepStatus::NoKeep => "nokeep",
        }
    }

    /// Parses tool output or stored values. Anything unrecognised is `NoKeep`.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    pub fn is_kept(&self) -> bool {
        !matches!(self, KeepStatus::NoKeep)
    }
}

impl fmt::Display for KeepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standalone" => Ok(KeepStatus::Standalone),
            "full" => Ok(KeepStatus::Full),
            "nokeep" => Ok(KeepStatus::NoKeep),
            other => Err(format!("unknown keep status '{other}'")),
        }
    }
}

/// Which kind of operator hold to request from the backup tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepTarget {
    Standalone,
    Full,
}

impl From<KeepTarget> for KeepStatus {
    fn from(target: KeepTarget) -> Self {
        match target {
            KeepTarget::Standalone => KeepStatus::Standalone,
            KeepTarget::Full => KeepStatus::Full,
        }
    }
}

/// One catalog row: a logical backup as present in a single storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    pub location_id: String,
    pub timestamp: DateTime<Utc>,
    pub archival_status: KeepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Backup {
    pub fn new(
        backup_id: impl Into<String>,
        location_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_id: backup_id.into(),
            location_id: location_id.into(),
            timestamp,
            archival_status: KeepStatus::NoKeep,
            name: None,
        }
    }

    pub fn with_status(mut self, status: KeepStatus) -> Self {
        self.archival_status = status;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A catalog row together with its archival state, derived at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupView {
    #[serde(flatten)]
    pub backup: Backup,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_until: Option<DateTime<Utc>>,
}

/// All catalog rows sharing one backup id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupGroup {
    pub backup_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_until: Option<DateTime<Utc>>,
    pub backups: Vec<Backup>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("standalone", KeepStatus::Standalone)]
    #[case("full", KeepStatus::Full)]
    #[case("nokeep", KeepStatus::NoKeep)]
    #[case(" FULL\n", KeepStatus::Full)]
    #[case("", KeepStatus::NoKeep)]
    #[case("garbage", KeepStatus::NoKeep)]
    fn test_parse_lenient(#[case] input: &str, #[case] expected: KeepStatus) {
        assert_eq!(KeepStatus::parse_lenient(input), expected);
    }

    #[test]
    fn test_keep_status_serde_uses_tool_spelling() {
        assert_eq!(
            serde_json::to_string(&KeepStatus::NoKeep).unwrap(),
            "\"nokeep\""
        );
        let status: KeepStatus = serde_json::from_str("\"standalone\"").unwrap();
        assert_eq!(status, KeepStatus::Standalone);
        assert_eq!(KeepStatus::NoKeep.to_string(), "nokeep");
    }

    #[test]
    fn test_view_flattens_backup() {
        let timestamp = DateTime::parse_from_rfc3339("2024-03-03T02:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let view = BackupView {
            backup: Backup::new("20240303T020000", "primary", timestamp),
            archived: false,
            archived_until: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["backup_id"], "20240303T020000");
        assert_eq!(json["archival_status"], "nokeep");
        assert_eq!(json["archived"], false);
        assert!(json.get("archived_until").is_none());
    }
}
