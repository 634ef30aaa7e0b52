use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Failed to access settings file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Settings serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type SettingsResult<T> = Result<T, SettingsError>;
