//! Archival policy evaluation.
//!
//! [`calendar`] holds the recurrence and date arithmetic rules, [`engine`]
//! turns a database's ordered policy list into a keep/none decision. Both
//! are pure; the only input that changes between calls is the [`Clock`].

pub mod calendar;
mod clock;
mod engine;
mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{ArchiveAction, ArchiveDecision, ArchiveService, evaluate};
pub use error::ArchiveError;
