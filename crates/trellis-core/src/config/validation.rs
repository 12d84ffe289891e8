//! Configuration validation

use globset::Glob;
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_build(config)?;
    validate_backend(config)?;
    validate_test(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn validate_build(config: &Config) -> Result<()> {
    if config.build.build_dir.as_os_str().is_empty() {
        return Err(invalid("build.build_dir", "build directory cannot be empty").into());
    }
    if config.build.targets_file.as_os_str().is_empty() {
        return Err(invalid("build.targets_file", "targets file cannot be empty").into());
    }
    Ok(())
}

fn validate_backend(config: &Config) -> Result<()> {
    if config.backend.program.trim().is_empty() {
        return Err(invalid("backend.program", "program cannot be empty").into());
    }
    Ok(())
}

fn validate_test(config: &Config) -> Result<()> {
    if config.test.poll_interval_ms == 0 {
        return Err(invalid("test.poll_interval_ms", "must be greater than zero").into());
    }
    if config.test.freshness_secs == 0 {
        return Err(invalid("test.freshness_secs", "must be greater than zero").into());
    }

    for (i, pattern) in config.test.watched_env.iter().enumerate() {
        if let Err(e) = Glob::new(pattern) {
            return Err(ConfigError::InvalidValue {
                field: format!("test.watched_env[{}]", i),
                message: e.to_string(),
            }
            .into());
        }
    }

    Ok(())
}
