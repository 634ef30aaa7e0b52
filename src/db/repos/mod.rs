mod backups;

pub(crate) use backups::backup_from_columns;
pub use backups::*;
