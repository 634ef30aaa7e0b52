use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The policy's retention length cannot be added to the backup's local
    /// time without leaving the supported calendar range.
    #[error("Archival policy {policy_id} overflows the calendar when applied to {begin}")]
    CalendarOverflow { policy_id: Uuid, begin: NaiveDateTime },
}
