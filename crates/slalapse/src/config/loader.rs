use std::path::{Path, PathBuf};

use log::warn;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// One hour.
pub const MAX_CAPTURE_DELAY_SECONDS: u64 = 3_600;
/// One day.
pub const MAX_INACTIVITY_TIMEOUT_SECONDS: u64 = 86_400;

/// Default location of the config file (`<config dir>/slalapse/config.json`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("slalapse").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Loads the given file, or the default location when it exists, or falls
/// back to built-in defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = path {
        return load_config(path);
    }

    match default_config_path() {
        Some(default_path) if default_path.exists() => load_config(default_path),
        _ => Ok(Config::default()),
    }
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.capture_delay_seconds > MAX_CAPTURE_DELAY_SECONDS {
        return Err(ConfigError::Validation {
            message: format!(
                "captureDelaySeconds ({}) must be at most {}",
                config.capture_delay_seconds, MAX_CAPTURE_DELAY_SECONDS
            ),
        });
    }

    if config.inactivity_timeout_seconds > MAX_INACTIVITY_TIMEOUT_SECONDS {
        return Err(ConfigError::Validation {
            message: format!(
                "inactivityTimeoutSeconds ({}) must be at most {}",
                config.inactivity_timeout_seconds, MAX_INACTIVITY_TIMEOUT_SECONDS
            ),
        });
    }

    if config.inactivity_timeout_seconds <= config.capture_delay_seconds {
        return Err(ConfigError::Validation {
            message: format!(
                "inactivityTimeoutSeconds ({}) must be greater than captureDelaySeconds ({})",
                config.inactivity_timeout_seconds, config.capture_delay_seconds
            ),
        });
    }

    if config.frame_rate == 0 {
        return Err(ConfigError::Validation {
            message: "frameRate must be at least 1".to_string(),
        });
    }

    if config.snapshot_folder.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "snapshotFolder must not be empty".to_string(),
        });
    }

    if config.delete_folder_after_archive && !config.archive_on_finalize {
        warn!("deleteFolderAfterArchive has no effect while archiveOnFinalize is false");
    }

    Ok(())
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf, ConfigError> {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| ConfigError::HomeDirectory(path.to_string()))?;
        let rest = path.trim_start_matches('~').trim_start_matches('/');
        return Ok(if rest.is_empty() {
            home
        } else {
            home.join(rest)
        });
    }
    Ok(PathBuf::from(path))
}
