use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use backup_keeper::{
    archive::{ArchiveService, SystemClock},
    config::KeeperConfig,
    db::DbPool,
    events::EventBus,
    models::{ArchivalPolicy, KeepTarget, RetentionPolicy, RetentionUnit},
    observability,
    retention::{self, RetentionSweep},
    services::BackupService,
    settings::SettingsStore,
    tool::BarmanCloudTool,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// CLI arguments for the backup keeper
#[derive(Parser, Debug)]
#[command(version, about = "Backup retention and archival policy engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "backup-keeper.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the periodic retention sweep until stopped (default)
    Serve,
    /// Run a single retention sweep and exit
    Sweep {
        /// Log what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the archive decision for a backup timestamp
    Decide {
        #[arg(long)]
        db: String,
        /// Backup time (RFC 3339)
        #[arg(long)]
        at: DateTime<Utc>,
        /// Evaluate as of this instant instead of now (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// List catalogued backups of a database
    Backups {
        #[arg(long)]
        db: String,
        /// One entry per backup instead of one per location
        #[arg(long)]
        grouped: bool,
    },
    /// Record a new backup in every location of a database
    Record {
        #[arg(long)]
        db: String,
        #[arg(long)]
        backup_id: String,
        #[arg(long)]
        name: Option<String>,
        /// Backup time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Place an operator hold on a backup
    Keep {
        #[arg(long)]
        db: String,
        #[arg(long)]
        backup_id: String,
        /// Locations to hold the backup in; repeat for several
        #[arg(long = "location", required = true)]
        locations: Vec<String>,
        #[arg(long, value_enum, default_value = "full")]
        target: Target,
    },
    /// Release an operator hold
    Release {
        #[arg(long)]
        db: String,
        #[arg(long)]
        backup_id: String,
        #[arg(long = "location", required = true)]
        locations: Vec<String>,
    },
    /// Rebuild the catalog of a database from the backup tool's listings
    Sync {
        #[arg(long)]
        db: String,
    },
    /// Drop every catalog row of a database; storage is not touched
    Clear {
        #[arg(long)]
        db: String,
    },
    /// Show or edit the policies of a database
    Policies {
        #[arg(long)]
        db: String,
        #[command(subcommand)]
        action: Option<PolicyAction>,
    },
    /// Run catalog migrations and exit
    Migrate,
}

#[derive(clap::Subcommand, Debug)]
enum PolicyAction {
    /// Print the retention and archival policies (default)
    List,
    /// Append a preset archival policy
    AddPreset {
        #[arg(value_enum)]
        preset: Preset,
    },
    /// Remove an archival policy by id
    Remove { id: Uuid },
    /// Replace the retention policy
    SetRetention {
        #[arg(long)]
        minimum_redundancy: u32,
        #[arg(long)]
        retention: u32,
        #[arg(long, value_enum, default_value = "week")]
        units: Units,
    },
}

impl PolicyAction {
    fn is_edit(&self) -> bool {
        !matches!(self, PolicyAction::List)
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Preset {
    /// First Sunday of the month, kept for a year
    Monthly,
    /// First Sunday of the year, kept for five years
    Yearly,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Target {
    Full,
    Standalone,
}

impl From<Target> for KeepTarget {
    fn from(target: Target) -> Self {
        match target {
            Target::Full => KeepTarget::Full,
            Target::Standalone => KeepTarget::Standalone,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Units {
    Day,
    Week,
    Month,
}

impl From<Units> for RetentionUnit {
    fn from(units: Units) -> Self {
        match units {
            Units::Day => RetentionUnit::Day,
            Units::Week => RetentionUnit::Week,
            Units::Month => RetentionUnit::Month,
        }
    }
}

/// Everything the commands share, wired from one config file.
struct App {
    config: KeeperConfig,
    db: Option<Arc<DbPool>>,
    settings: SettingsStore,
    archive: ArchiveService,
    tool: Arc<BarmanCloudTool>,
    events: EventBus,
}

impl App {
    fn db(&self) -> Arc<DbPool> {
        match &self.db {
            Some(db) => Arc::clone(db),
            None => exit_with("This command requires a [catalog] section in the config"),
        }
    }

    fn backup_service(&self) -> BackupService {
        BackupService::new(
            self.db().backups(),
            self.settings.clone(),
            self.archive.clone(),
            self.tool.clone(),
            self.events.clone(),
        )
    }

    fn retention_sweep(&self) -> RetentionSweep {
        RetentionSweep::new(
            self.db().backups(),
            self.settings.clone(),
            self.archive.clone(),
            self.tool.clone(),
            self.events.clone(),
            self.config.sweep.clone(),
        )
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(&args.config);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }

    let app = build_app(config).await;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(app, &args.config).await,
        Command::Sweep { dry_run } => {
            let sweep = app.retention_sweep();
            let report = sweep
                .run_sweep_with(dry_run || app.config.sweep.safety.dry_run)
                .await;
            print_json(&serde_json::json!({
                "dry_run": report.dry_run,
                "databases": report.databases,
                "candidates": report.candidates,
                "deleted": report.deleted,
                "failed_deletes": report.failed_deletes,
                "failed_databases": report.failed_databases,
            }));
            if report.has_failures() {
                std::process::exit(2);
            }
        }
        Command::Decide { db, at, now } => {
            let settings = app.settings.snapshot();
            if settings.database(&db).is_none() {
                tracing::warn!(db = %db, "Database is not configured");
            }
            let now = now.unwrap_or_else(|| app.archive.now());
            match app.archive.determine_action_at(&settings, &db, at, now) {
                Ok(decision) => print_json(&decision),
                Err(e) => exit_with(e),
            }
        }
        Command::Backups { db, grouped } => {
            let service = app.backup_service();
            if grouped {
                print_result(service.backup_groups(&db).await);
            } else {
                print_result(service.list_backups(&db).await);
            }
        }
        Command::Record {
            db,
            backup_id,
            name,
            at,
        } => {
            let at = at.unwrap_or_else(|| app.archive.now());
            print_result(
                app.backup_service()
                    .record_backup(&db, &backup_id, name, at)
                    .await,
            );
        }
        Command::Keep {
            db,
            backup_id,
            locations,
            target,
        } => {
            print_result(
                app.backup_service()
                    .set_keep(&db, &backup_id, &locations, target.into())
                    .await,
            );
        }
        Command::Release {
            db,
            backup_id,
            locations,
        } => {
            print_result(
                app.backup_service()
                    .release_keep(&db, &backup_id, &locations)
                    .await,
            );
        }
        Command::Sync { db } => {
            let rows = app
                .backup_service()
                .sync_catalog(&db)
                .await
                .unwrap_or_else(|e| exit_with(e));
            println!("Synchronized {rows} catalog rows for '{db}'");
        }
        Command::Clear { db } => {
            let removed = app
                .backup_service()
                .clear_catalog(&db)
                .await
                .unwrap_or_else(|e| exit_with(e));
            println!("Removed {removed} catalog rows for '{db}'");
        }
        Command::Policies { db, action } => {
            run_policies(&app.settings, &db, action.unwrap_or(PolicyAction::List));
        }
        Command::Migrate => run_migrate(&app).await,
    }
}

fn load_config(path: &Path) -> KeeperConfig {
    match KeeperConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

async fn build_app(config: KeeperConfig) -> App {
    let settings = SettingsStore::load(&config).unwrap_or_else(|e| exit_with(e));

    let db = if config.catalog.is_none() {
        None
    } else {
        let db = DbPool::from_config(&config.catalog)
            .await
            .unwrap_or_else(|e| exit_with(format!("Failed to open backup catalog: {e}")));
        if config.catalog.run_migrations() {
            db.run_migrations()
                .await
                .unwrap_or_else(|e| exit_with(format!("Failed to run migrations: {e}")));
        }
        Some(Arc::new(db))
    };

    App {
        tool: Arc::new(BarmanCloudTool::new(config.tool.clone())),
        archive: ArchiveService::new(Arc::new(SystemClock)),
        events: EventBus::new(),
        db,
        settings,
        config,
    }
}

async fn run_server(app: App, config_path: &Path) {
    if let Err(e) = observability::metrics::init_metrics(&app.config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    tracing::info!(
        config_file = %config_path.display(),
        databases = app.settings.snapshot().databases.len(),
        "Starting backup keeper"
    );

    let db = app.db();
    if let Err(e) = db.health_check().await {
        exit_with(format!("Backup catalog is unreachable: {e}"));
    }

    let task_tracker = TaskTracker::new();

    // Event log
    let mut events = app.events.subscribe();
    task_tracker.spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::info!(event_type = event.event_type(), event = ?event, "Backup event")
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let sweep = Arc::new(app.retention_sweep());
    let worker = tokio::spawn(retention::start_retention_worker(sweep));

    shutdown_signal().await;

    // A running tool call is killed; its pair is retried by the next sweep.
    worker.abort();
    drop(app);

    task_tracker.close();
    let wait_result =
        tokio::time::timeout(std::time::Duration::from_secs(30), task_tracker.wait()).await;

    match wait_result {
        Ok(()) => tracing::info!("All background tasks completed"),
        Err(_) => {
            tracing::warn!("Timeout waiting for background tasks, some may not have completed")
        }
    }

    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping retention worker...");
}

fn run_policies(settings: &SettingsStore, db: &str, action: PolicyAction) {
    if action.is_edit() && !settings.is_persistent() {
        exit_with(
            "Policy edits need a state file; set settings.state_path in the config \
             so the change survives this run",
        );
    }

    match action {
        PolicyAction::List => {
            let retention = settings
                .retention_policy(db)
                .unwrap_or_else(|e| exit_with(e));
            let archival = settings
                .archival_policies(db)
                .unwrap_or_else(|e| exit_with(e));
            print_json(&serde_json::json!({
                "retention_policy": retention,
                "archival_policies": archival,
            }));
        }
        PolicyAction::AddPreset { preset } => {
            let policy = match preset {
                Preset::Monthly => ArchivalPolicy::monthly(),
                Preset::Yearly => ArchivalPolicy::yearly(),
            };
            print_result(settings.upsert_archival_policy(db, policy));
        }
        PolicyAction::Remove { id } => {
            let removed = settings
                .remove_archival_policy(db, id)
                .unwrap_or_else(|e| exit_with(e));
            if removed {
                println!("Removed archival policy {id}");
            } else {
                println!("No archival policy {id} on '{db}'");
            }
        }
        PolicyAction::SetRetention {
            minimum_redundancy,
            retention,
            units,
        } => {
            let policy = RetentionPolicy {
                minimum_redundancy,
                retention,
                retention_units: units.into(),
            };
            settings
                .set_retention_policy(db, policy)
                .unwrap_or_else(|e| exit_with(e));
            print_json(&policy);
        }
    }
}

/// Run catalog migrations and exit.
///
/// Migrations already ran while opening the catalog when the config enables
/// them; this forces them either way.
async fn run_migrate(app: &App) {
    let db = app.db();
    tracing::info!("Running catalog migrations");
    if let Err(e) = db.run_migrations().await {
        exit_with(format!("Migration failed: {e}"));
    }
    println!("Migrations completed successfully");
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => exit_with(format!("Failed to serialize output: {e}")),
    }
}

fn print_result<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => exit_with(e),
    }
}

fn exit_with(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}
