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
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let compiled =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
            message: format!("Failed to compile JSON schema: {}", e),
        })?;

    let error_messages: Vec<String> = compiled
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Validate version
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    // Validate worker base URL
    match reqwest::Url::parse(&config.worker_base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => {
            return Err(ConfigError::Validation {
                message: format!("worker_base_url must be http(s), got '{}'", url.scheme()),
            });
        }
        Err(e) => {
            return Err(ConfigError::Validation {
                message: format!("Invalid worker_base_url '{}': {}", config.worker_base_url, e),
            });
        }
    }

    // Validate listen address
    if config.listen_address.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation {
            message: format!("Invalid listen_address '{}'", config.listen_address),
        });
    }

    if config.batch_limit == 0 {
        return Err(ConfigError::Validation {
            message: "batch_limit must be at least 1".to_string(),
        });
    }

    if config.dispatch_concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "dispatch_concurrency must be at least 1".to_string(),
        });
    }

    if config.claim_ttl_secs <= 0 {
        return Err(ConfigError::Validation {
            message: "claim_ttl_secs must be positive".to_string(),
        });
    }

    Ok(())
}
