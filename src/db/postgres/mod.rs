mod backups;

pub use backups::PostgresBackupRepo;
