use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

use super::{ArchiveError, Clock, calendar};
use crate::{models::ArchivalPolicy, observability::metrics, settings::Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveAction {
    Keep,
    None,
}

impl ArchiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveAction::Keep => "keep",
            ArchiveAction::None => "none",
        }
    }
}

/// Outcome of evaluating a backup against a database's archival policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ArchiveDecision {
    /// Protected until `until` by the policy `policy_id`.
    Keep { until: DateTime<Utc>, policy_id: Uuid },
    None,
}

impl ArchiveDecision {
    pub fn action(&self) -> ArchiveAction {
        match self {
            ArchiveDecision::Keep { .. } => ArchiveAction::Keep,
            ArchiveDecision::None => ArchiveAction::None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, ArchiveDecision::Keep { .. })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ArchiveDecision::Keep { until, .. } => Some(*until),
            ArchiveDecision::None => None,
        }
    }
}

/// Evaluates archival policies for a backup taken at `backup_time`.
///
/// Policies are scanned in order. A policy that matches but has already
/// expired does not end the scan: a later policy can still keep the backup.
/// Both instants are compared as local wall-clock times in `tz`.
pub fn evaluate(
    policies: &[ArchivalPolicy],
    backup_time: DateTime<Utc>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<ArchiveDecision, ArchiveError> {
    let backup_local = backup_time.with_timezone(&tz).naive_local();
    let now_local = now.with_timezone(&tz).naive_local();

    for policy in policies {
        if !calendar::matches(&policy.strategy, backup_local.date()) {
            continue;
        }

        let overflow = || ArchiveError::CalendarOverflow {
            policy_id: policy.id,
            begin: backup_local,
        };
        let expiration = calendar::expiration_date(&policy.retention, backup_local)
            .ok_or_else(overflow)?;

        if expiration > now_local {
            let until = calendar::resolve_leniently(&tz, expiration).ok_or_else(overflow)?;
            return Ok(ArchiveDecision::Keep {
                until,
                policy_id: policy.id,
            });
        }
    }

    Ok(ArchiveDecision::None)
}

/// Answers "is this backup archived?" for a configured database.
#[derive(Clone)]
pub struct ArchiveService {
    clock: Arc<dyn Clock>,
}

impl ArchiveService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Decision for a backup of `db_id` as of the current clock reading.
    /// An unknown database yields [`ArchiveDecision::None`].
    pub fn determine_action(
        &self,
        settings: &Settings,
        db_id: &str,
        backup_time: DateTime<Utc>,
    ) -> Result<ArchiveDecision, ArchiveError> {
        self.determine_action_at(settings, db_id, backup_time, self.clock.now())
    }

    /// Same as [`determine_action`](Self::determine_action) with an explicit
    /// `now`, so callers can evaluate many backups against one instant.
    pub fn determine_action_at(
        &self,
        settings: &Settings,
        db_id: &str,
        backup_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ArchiveDecision, ArchiveError> {
        let Some(db) = settings.database(db_id) else {
            return Ok(ArchiveDecision::None);
        };

        let decision = evaluate(&db.archival_policies, backup_time, now, settings.timezone)?;
        metrics::record_archive_decision(decision.action().as_str());
        Ok(decision)
    }
}
