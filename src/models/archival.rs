use chrono::Weekday;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Calendar unit used for archival retention lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Day,
    Week,
    Month,
    Year,
}

/// The period an [`RetentionStrategy::TargetDay`] occurrence is counted within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceUnit {
    Month,
    Year,
}

/// How long a matching backup stays archived, measured from the backup's
/// local date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ArchiveRetention {
    #[validate(range(min = 1))]
    pub duration: u32,
    pub units: DurationUnit,
}

/// Recurrence rule deciding which backups an archival policy applies to.
///
/// ```toml
/// strategy = { type = "target_day", day_of_week = "Sun", occurrence = 1, occurrence_units = "month" }
/// ```
///
/// Occurrence ordinals outside 1-5 (month) or 1-53 (year) are accepted and
/// simply never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum RetentionStrategy {
    /// Every backup taken on the given weekday.
    DayOfWeek { day_of_week: Weekday },
    /// Only the Nth occurrence of the weekday within a month or year.
    TargetDay {
        day_of_week: Weekday,
        occurrence: u32,
        occurrence_units: OccurrenceUnit,
    },
}

impl RetentionStrategy {
    pub fn day_of_week(&self) -> Weekday {
        match self {
            RetentionStrategy::DayOfWeek { day_of_week }
            | RetentionStrategy::TargetDay { day_of_week, .. } => *day_of_week,
        }
    }
}

/// A long-term archival rule attached to a managed database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ArchivalPolicy {
    /// Policies written in the config file may omit the id; they get a
    /// stable one from [`ArchivalPolicy::config_id`] when settings load.
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    #[validate(nested)]
    pub retention: ArchiveRetention,
    #[validate(custom(function = "validate_strategy"))]
    pub strategy: RetentionStrategy,
}

impl ArchivalPolicy {
    pub fn new(retention: ArchiveRetention, strategy: RetentionStrategy) -> Self {
        Self {
            id: Uuid::new_v4(),
            retention,
            strategy,
        }
    }

    /// Stable id for the `index`th policy of `db_id` in the config file, so
    /// the same file yields the same ids on every start.
    pub fn config_id(db_id: &str, index: usize) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("backup-keeper/{db_id}/archival_policies/{index}").as_bytes(),
        )
    }

    /// First Sunday of every month, kept for one year.
    pub fn monthly() -> Self {
        Self::new(
            ArchiveRetention {
                duration: 1,
                units: DurationUnit::Year,
            },
            RetentionStrategy::TargetDay {
                day_of_week: Weekday::Sun,
                occurrence: 1,
                occurrence_units: OccurrenceUnit::Month,
            },
        )
    }

    /// First Sunday of every year, kept for five years.
    pub fn yearly() -> Self {
        Self::new(
            ArchiveRetention {
                duration: 5,
                units: DurationUnit::Year,
            },
            RetentionStrategy::TargetDay {
                day_of_week: Weekday::Sun,
                occurrence: 1,
                occurrence_units: OccurrenceUnit::Year,
            },
        )
    }
}

// Only rejects an ordinal of zero. Larger ordinals are legal data that never matches.
fn validate_strategy(strategy: &RetentionStrategy) -> Result<(), ValidationError> {
    match strategy {
        RetentionStrategy::TargetDay { occurrence: 0, .. } => {
            Err(ValidationError::new("occurrence_must_be_positive"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_day_policy() {
        let policy: ArchivalPolicy = toml::from_str(
            r#"
            id = "7b1c5a4e-7d8f-4a57-9f0e-2f1d6c3b9a10"
            retention = { duration = 1, units = "year" }
            strategy = { type = "target_day", day_of_week = "Sun", occurrence = 1, occurrence_units = "month" }
        "#,
        )
        .unwrap();

        assert_eq!(policy.retention.units, DurationUnit::Year);
        assert_eq!(
            policy.strategy,
            RetentionStrategy::TargetDay {
                day_of_week: Weekday::Sun,
                occurrence: 1,
                occurrence_units: OccurrenceUnit::Month,
            }
        );
    }

    #[test]
    fn test_missing_id_is_generated() {
        let a: ArchivalPolicy = serde_json::from_str(
            r#"{"retention":{"duration":1,"units":"week"},"strategy":{"type":"day_of_week","day_of_week":"Sun"}}"#,
        )
        .unwrap();
        let b: ArchivalPolicy = serde_json::from_str(
            r#"{"retention":{"duration":1,"units":"week"},"strategy":{"type":"day_of_week","day_of_week":"Sun"}}"#,
        )
        .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        let result = serde_json::from_str::<ArchivalPolicy>(
            r#"{"retention":{"duration":1,"units":"fortnight"},"strategy":{"type":"day_of_week","day_of_week":"Sun"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        assert!(ArchivalPolicy::monthly().validate().is_ok());
        assert!(ArchivalPolicy::yearly().validate().is_ok());

        let mut zero_duration = ArchivalPolicy::monthly();
        zero_duration.retention.duration = 0;
        assert!(zero_duration.validate().is_err());

        let zero_occurrence = ArchivalPolicy::new(
            ArchiveRetention {
                duration: 1,
                units: DurationUnit::Month,
            },
            RetentionStrategy::TargetDay {
                day_of_week: Weekday::Mon,
                occurrence: 0,
                occurrence_units: OccurrenceUnit::Month,
            },
        );
        assert!(zero_occurrence.validate().is_err());

        // Out-of-range ordinals are stored as-is
        let sixth_monday = ArchivalPolicy::new(
            ArchiveRetention {
                duration: 1,
                units: DurationUnit::Month,
            },
            RetentionStrategy::TargetDay {
                day_of_week: Weekday::Mon,
                occurrence: 6,
                occurrence_units: OccurrenceUnit::Month,
            },
        );
        assert!(sixth_monday.validate().is_ok());
    }
}
