mod backups;

pub use backups::SqliteBackupRepo;
