//! Retention sweep: periodic deletion of expired backups.
//!
//! For every configured database the sweep
//! 1. loads backups without an operator keep, newest first
//! 2. protects the `minimum_redundancy` most recent ones
//! 3. keeps everything inside the rolling retention window
//! 4. keeps anything an active archival policy still covers
//!
//! and deletes what is left from each of the database's storage locations,
//! one (backup, location) pair at a time.

mod error;
mod plan;
mod worker;

pub use error::SweepError;
pub use plan::{Candidate, retention_threshold, select_candidates};
pub use worker::{RetentionSweep, SweepReport, start_retention_worker};
