use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// External backup tool executables.
///
/// Each command is resolved through `PATH` unless given as an absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    #[serde(default = "default_delete_command")]
    pub delete_command: String,

    #[serde(default = "default_keep_command")]
    pub keep_command: String,

    #[serde(default = "default_list_command")]
    pub list_command: String,

    /// Upper bound for a single tool invocation, in seconds. A timeout is
    /// reported as a failed operation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            delete_command: default_delete_command(),
            keep_command: default_keep_command(),
            list_command: default_list_command(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_delete_command() -> String {
    "barman-cloud-backup-delete".into()
}

fn default_keep_command() -> String {
    "barman-cloud-backup-keep".into()
}

fn default_list_command() -> String {
    "barman-cloud-backup-list".into()
}

fn default_timeout_secs() -> u64 {
    600
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("delete_command", &self.delete_command),
            ("keep_command", &self.keep_command),
            ("list_command", &self.list_command),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tool.{key} cannot be empty"
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "tool.timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
