//! Configuration file loading and parsing.

use std::path::Path;

use anyhow::{Context, Result};

use super::model::AppConfig;
use crate::error::ConfigError;
use crate::validation::report::format_report;
use crate::validation::{validate_config, ValidationResult};

/// Loads the configuration file from disk and parses it.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: AppConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(config)
}

/// Loads the configuration and returns it with its validation result,
/// without rejecting invalid settings.
pub fn load_with_report(path: &Path) -> Result<(AppConfig, ValidationResult), ConfigError> {
    let config = load_from_path(path)?;
    let result = validate_config(&config);
    Ok((config, result))
}

/// Loads and fully validates the configuration file.
pub fn load_and_validate(path: &Path) -> Result<AppConfig> {
    let (config, result) = load_with_report(path).context("Failed to load configuration")?;

    for issue in result.warnings() {
        tracing::warn!(
            path = %issue.path,
            message = %issue.message,
            suggestion = ?issue.suggestion,
            "Config validation warning"
        );
    }

    let error_count = result.error_count();
    if error_count > 0 {
        tracing::error!("{}", format_report(&result, Some("Config rejected. Current config unchanged.")));
        anyhow::bail!(ConfigError::ValidationFailed { error_count });
    }

    Ok(config)
}
