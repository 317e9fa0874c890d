use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
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
            message: format!("bundled config schema is not JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("bundled config schema does not compile: {}", e),
    })?;

    let problems: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} ({})", e, e.instance_path()))
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::SchemaValidation {
            errors: problems.join("; "),
        })
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("config version {} is not supported, expected 1.0", config.version),
        });
    }

    if config.uploads_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "uploads_directory is blank".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count of 0 would never process an upload".to_string(),
        });
    }

    if config.scheduler.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.max_attempts of 0 would never run the pipeline".to_string(),
        });
    }

    Ok(())
}
