use thiserror::Error;

use crate::{archive::ArchiveError, db::DbError, models::RetentionUnit};

/// Failure of the sweep for one database. Other databases are unaffected.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] DbError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Retention window of {retention} {unit:?} overflows the calendar")]
    WindowOverflow { retention: u32, unit: RetentionUnit },
}
