use std::path::Path;

use crate::config::schema::BooksumConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BooksumConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<BooksumConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: BooksumConfig = serde_json::from_value(json_value)?;

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

fn validate_config(config: &BooksumConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let toc = &config.toc;
    if toc.scan_start_page > toc.narrow_end_page {
        return Err(ConfigError::Validation {
            message: format!(
                "toc.scan_start_page ({}) must not exceed toc.narrow_end_page ({})",
                toc.scan_start_page, toc.narrow_end_page
            ),
        });
    }
    if toc.narrow_end_page > toc.wide_end_page {
        return Err(ConfigError::Validation {
            message: format!(
                "toc.narrow_end_page ({}) must not exceed toc.wide_end_page ({})",
                toc.narrow_end_page, toc.wide_end_page
            ),
        });
    }
    if toc.min_chapters == 0 || toc.runaway_limit < toc.min_chapters {
        return Err(ConfigError::Validation {
            message: format!(
                "toc.runaway_limit ({}) must be at least toc.min_chapters ({}), which must be positive",
                toc.runaway_limit, toc.min_chapters
            ),
        });
    }

    let pipeline = &config.pipeline;
    if pipeline.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.worker_count must be at least 1".to_string(),
        });
    }
    if pipeline.retry.max_attempts == 0 || pipeline.max_deliveries == 0 {
        return Err(ConfigError::Validation {
            message: "retry budgets must allow at least one attempt".to_string(),
        });
    }
    if pipeline.retry.base_delay_ms > pipeline.retry.max_delay_ms {
        return Err(ConfigError::Validation {
            message: "pipeline.retry.base_delay_ms must not exceed max_delay_ms".to_string(),
        });
    }

    for (name, store) in [
        ("storage.job_store", &config.storage.job_store),
        ("storage.output_store", &config.storage.output_store),
    ] {
        let needs_path = store.backend != crate::config::StoreBackend::Memory;
        if needs_path && store.path.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Validation {
                message: format!("{} requires a path for the {:?} backend", name, store.backend),
            });
        }
    }

    Ok(())
}
