mod backups;

pub use backups::{BackupService, BackupServiceError, BackupServiceResult};
