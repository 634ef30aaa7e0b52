mod archival;
mod backup;
mod retention;

pub use archival::*;
pub use backup::*;
pub use retention::*;
