use std::collections::HashSet;

use chrono::{DateTime, Days, Months, Utc};

use super::SweepError;
use crate::models::{Backup, RetentionPolicy, RetentionUnit};

/// A logical backup selected for deletion from every location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Start of the rolling retention window, or `None` when the window is
/// disabled.
pub fn retention_threshold(
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SweepError> {
    if !policy.has_time_window() {
        return Ok(None);
    }

    let n = policy.retention;
    let threshold = match policy.retention_units {
        RetentionUnit::Day => now.checked_sub_days(Days::new(u64::from(n))),
        RetentionUnit::Week => now.checked_sub_days(Days::new(u64::from(n) * 7)),
        RetentionUnit::Month => now.checked_sub_months(Months::new(n)),
    };

    threshold.map(Some).ok_or(SweepError::WindowOverflow {
        retention: n,
        unit: policy.retention_units,
    })
}

/// Picks the backups of one database that the sweep deletes.
///
/// `rows` are the database's `nokeep` catalog rows, newest first. Rows of
/// the same backup in several locations count once. `is_archived` is
/// consulted last and only for backups that survived the other rules.
pub fn select_candidates<F>(
    rows: &[Backup],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    mut is_archived: F,
) -> Result<Vec<Candidate>, SweepError>
where
    F: FnMut(&Candidate) -> Result<bool, SweepError>,
{
    let mut seen = HashSet::new();
    let logical = rows
        .iter()
        .filter(|row| seen.insert(row.backup_id.as_str()))
        .map(|row| Candidate {
            backup_id: row.backup_id.clone(),
            timestamp: row.timestamp,
        });

    let threshold = retention_threshold(policy, now)?;

    // Prefix trim: the list is time ordered, so stop at the first old entry.
    let expired = logical
        .skip(policy.minimum_redundancy as usize)
        .skip_while(|c| threshold.is_some_and(|t| c.timestamp > t));

    let mut candidates = Vec::new();
    for candidate in expired {
        if !is_archived(&candidate)? {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}
