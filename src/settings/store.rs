use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;
use validator::Validate;

use super::{Settings, SettingsError, SettingsResult};
use crate::{
    config::{DatabaseConfig, KeeperConfig},
    models::{ArchivalPolicy, RetentionPolicy},
};

/// Thread-safe holder of the current [`Settings`].
///
/// Edits are copy-on-write: a writer clones the snapshot, changes the copy,
/// persists it and then swaps it in. Readers holding an older snapshot keep
/// seeing consistent data.
#[derive(Clone)]
pub struct SettingsStore {
    current: Arc<RwLock<Arc<Settings>>>,
    /// Serializes writers so two edits never race on the state file.
    write_lock: Arc<Mutex<()>>,
    state_path: Option<PathBuf>,
}

impl SettingsStore {
    /// In-memory store. Edits are lost on restart.
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
            write_lock: Arc::new(Mutex::new(())),
            state_path: None,
        }
    }

    /// Store that writes every edit to `path` as JSON.
    pub fn with_state_path(settings: Settings, path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: Some(path.into()),
            ..Self::new(settings)
        }
    }

    /// Builds the store for a config file.
    ///
    /// An existing state file wins over the TOML values so runtime policy
    /// edits survive restarts. Without one, the TOML values are written out
    /// as the initial state.
    pub fn load(config: &KeeperConfig) -> SettingsResult<Self> {
        let Some(path) = config.settings.state_path.clone() else {
            return Ok(Self::new(Settings::from_config(config)?));
        };

        let settings = if path.exists() {
            let settings = read_state(&path)?;
            tracing::info!(path = %path.display(), "Loaded settings from state file");
            settings
        } else {
            let settings = Settings::from_config(config)?;
            write_state(&path, &settings)?;
            tracing::info!(path = %path.display(), "Initialized settings state file");
            settings
        };

        Ok(Self::with_state_path(settings, path))
    }

    /// Whether edits are written to a state file.
    pub fn is_persistent(&self) -> bool {
        self.state_path.is_some()
    }

    /// The current settings. Cheap; take it once per operation.
    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read())
    }

    pub fn database(&self, db_id: &str) -> SettingsResult<DatabaseConfig> {
        self.snapshot()
            .database(db_id)
            .cloned()
            .ok_or_else(|| SettingsError::UnknownDatabase(db_id.to_string()))
    }

    /// Archival policies of a database in evaluation order.
    pub fn archival_policies(&self, db_id: &str) -> SettingsResult<Vec<ArchivalPolicy>> {
        Ok(self.database(db_id)?.archival_policies)
    }

    /// Replaces the policy with the same id, or appends it.
    pub fn upsert_archival_policy(
        &self,
        db_id: &str,
        policy: ArchivalPolicy,
    ) -> SettingsResult<ArchivalPolicy> {
        policy
            .validate()
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;

        self.update(db_id, |db| {
            match db.archival_policies.iter_mut().find(|p| p.id == policy.id) {
                Some(existing) => *existing = policy.clone(),
                None => db.archival_policies.push(policy.clone()),
            }
        })?;

        tracing::info!(db_id, policy_id = %policy.id, "Archival policy saved");
        Ok(policy)
    }

    /// Removes a policy by id. Returns whether anything was removed; an
    /// unknown id leaves the settings untouched.
    pub fn remove_archival_policy(&self, db_id: &str, policy_id: Uuid) -> SettingsResult<bool> {
        if !self
            .archival_policies(db_id)?
            .iter()
            .any(|p| p.id == policy_id)
        {
            return Ok(false);
        }

        self.update(db_id, |db| {
            db.archival_policies.retain(|p| p.id != policy_id);
        })?;

        tracing::info!(db_id, %policy_id, "Archival policy removed");
        Ok(true)
    }

    pub fn retention_policy(&self, db_id: &str) -> SettingsResult<RetentionPolicy> {
        Ok(self.database(db_id)?.retention_policy)
    }

    pub fn set_retention_policy(&self, db_id: &str, policy: RetentionPolicy) -> SettingsResult<()> {
        self.update(db_id, |db| db.retention_policy = policy)?;
        tracing::info!(
            db_id,
            minimum_redundancy = policy.minimum_redundancy,
            retention = policy.retention,
            "Retention policy saved"
        );
        Ok(())
    }

    fn update(&self, db_id: &str, edit: impl FnOnce(&mut DatabaseConfig)) -> SettingsResult<()> {
        let _guard = self.write_lock.lock();

        let mut next = Settings::clone(&self.snapshot());
        let db = next
            .databases
            .get_mut(db_id)
            .ok_or_else(|| SettingsError::UnknownDatabase(db_id.to_string()))?;
        edit(db);

        if let Some(path) = &self.state_path {
            write_state(path, &next)?;
        }

        *self.current.write() = Arc::new(next);
        Ok(())
    }
}

fn read_state(path: &Path) -> SettingsResult<Settings> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e, path.to_path_buf()))?;
    let settings: Settings = serde_json::from_str(&contents)?;
    settings.validate()?;
    Ok(settings)
}

// Write-then-rename: the state file is never observed truncated.
fn write_state(path: &Path, settings: &Settings) -> SettingsResult<()> {
    let json = serde_json::to_vec_pretty(settings)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).map_err(|e| SettingsError::Io(e, tmp.clone()))?;
    std::fs::rename(&tmp, path).map_err(|e| SettingsError::Io(e, path.to_path_buf()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Weekday;

    use super::*;
    use crate::models::{ArchiveRetention, DurationUnit, RetentionStrategy, RetentionUnit};

    fn settings() -> Settings {
        Settings {
            databases: BTreeMap::from([("orders".to_string(), DatabaseConfig::default())]),
            ..Settings::default()
        }
    }

    fn weekly() -> ArchivalPolicy {
        ArchivalPolicy::new(
            ArchiveRetention {
                duration: 4,
                units: DurationUnit::Week,
            },
            RetentionStrategy::DayOfWeek {
                day_of_week: Weekday::Sun,
            },
        )
    }

    #[test]
    fn test_upsert_appends_then_replaces() {
        let store = SettingsStore::new(settings());
        let monthly = store
            .upsert_archival_policy("orders", ArchivalPolicy::monthly())
            .unwrap();
        let weekly = store.upsert_archival_policy("orders", weekly()).unwrap();

        let mut longer = monthly.clone();
        longer.retention.duration = 3;
        store.upsert_archival_policy("orders", longer).unwrap();

        let policies = store.archival_policies("orders").unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].id, monthly.id);
        assert_eq!(policies[0].retention.duration, 3);
        assert_eq!(policies[1].id, weekly.id);
    }

    #[test]
    fn test_remove_policy() {
        let store = SettingsStore::new(settings());
        let yearly = store
            .upsert_archival_policy("orders", ArchivalPolicy::yearly())
            .unwrap();

        assert!(!store.remove_archival_policy("orders", Uuid::new_v4()).unwrap());
        assert_eq!(store.archival_policies("orders").unwrap().len(), 1);

        assert!(store.remove_archival_policy("orders", yearly.id).unwrap());
        assert!(store.archival_policies("orders").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_database() {
        let store = SettingsStore::new(settings());
        assert!(matches!(
            store.archival_policies("billing"),
            Err(SettingsError::UnknownDatabase(ref db)) if db == "billing"
        ));
        assert!(matches!(
            store.upsert_archival_policy("billing", ArchivalPolicy::monthly()),
            Err(SettingsError::UnknownDatabase(_))
        ));
        assert!(matches!(
            store.set_retention_policy("billing", RetentionPolicy::default()),
            Err(SettingsError::UnknownDatabase(_))
        ));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let store = SettingsStore::new(settings());
        let mut policy = weekly();
        policy.retention.duration = 0;
        assert!(matches!(
            store.upsert_archival_policy("orders", policy),
            Err(SettingsError::Invalid(_))
        ));
        assert!(store.archival_policies("orders").unwrap().is_empty());
    }

    #[test]
    fn test_old_snapshot_is_unchanged_by_edits() {
        let store = SettingsStore::new(settings());
        let before = store.snapshot();
        store
            .set_retention_policy(
                "orders",
                RetentionPolicy {
                    minimum_redundancy: 7,
                    retention: 1,
                    retention_units: RetentionUnit::Month,
                },
            )
            .unwrap();

        assert_eq!(
            before.database("orders").unwrap().retention_policy,
            RetentionPolicy::default()
        );
        assert_eq!(
            store.retention_policy("orders").unwrap().minimum_redundancy,
            7
        );
    }

    #[test]
    fn test_edits_persist_across_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let config = KeeperConfig::from_str(&format!(
            r#"
            [settings]
            state_path = "{}"

            [databases.orders]
        "#,
            path.display()
        ))
        .unwrap();

        let store = SettingsStore::load(&config).unwrap();
        let policy = store
            .upsert_archival_policy("orders", ArchivalPolicy::monthly())
            .unwrap();
        assert!(path.exists());

        let reloaded = SettingsStore::load(&config).unwrap();
        assert_eq!(reloaded.archival_policies("orders").unwrap(), vec![policy]);
    }

    fn config_with_policies(state_path: Option<&Path>) -> KeeperConfig {
        let settings = state_path
            .map(|p| format!("[settings]\nstate_path = \"{}\"\n", p.display()))
            .unwrap_or_default();
        KeeperConfig::from_str(&format!(
            r#"
            {settings}
            [databases.orders]

            [[databases.orders.archival_policies]]
            retention = {{ duration = 1, units = "year" }}
            strategy = {{ type = "target_day", day_of_week = "Sun", occurrence = 1, occurrence_units = "month" }}

            [[databases.orders.archival_policies]]
            retention = {{ duration = 4, units = "week" }}
            strategy = {{ type = "day_of_week", day_of_week = "Sun" }}
        "#
        ))
        .unwrap()
    }

    #[test]
    fn test_config_policy_ids_are_stable() {
        let config = config_with_policies(None);

        let first = SettingsStore::load(&config).unwrap();
        let second = SettingsStore::load(&config).unwrap();
        let ids: Vec<Uuid> = first
            .archival_policies("orders")
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();

        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| !id.is_nil()));
        assert_ne!(ids[0], ids[1]);
        assert_eq!(second.archival_policies("orders").unwrap()[0].id, ids[0]);
        assert_eq!(ids[0], ArchivalPolicy::config_id("orders", 0));
        assert!(!first.is_persistent());
    }

    #[test]
    fn test_config_policy_removable_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let config = config_with_policies(Some(&path));

        let first = SettingsStore::load(&config).unwrap();
        assert!(first.is_persistent());
        assert!(path.exists());
        let listed = first.archival_policies("orders").unwrap()[0].id;

        let reloaded = SettingsStore::load(&config).unwrap();
        assert!(reloaded.remove_archival_policy("orders", listed).unwrap());

        let again = SettingsStore::load(&config).unwrap();
        let remaining = again.archival_policies("orders").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id, listed);
    }
}
