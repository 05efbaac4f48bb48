use crate::checksum::Checksummer;
use crate::config::types::{ChecksumSettings, Config, FilterRuleConfig, QueueSettings};
use crate::filter::FilterChain;
use crate::ConfigError;

/// Validates the entire configuration
///
/// Every pattern is compiled here so that a bad pattern fails at startup,
/// never while documents are being evaluated.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.pipeline.workers < 1 {
        return Err(ConfigError::Validation(format!(
            "workers must be >= 1, got {}",
            config.pipeline.workers
        )));
    }
    validate_filters(&config.metadata_filters, false)?;
    validate_filters(&config.content_filters, true)?;
    if let Some(checksum) = &config.checksum {
        validate_checksum(checksum)?;
    }
    validate_queue(&config.queue)?;
    Ok(())
}

/// Validates filter rules
fn validate_filters(rules: &[FilterRuleConfig], allow_content: bool) -> Result<(), ConfigError> {
    for rule in rules {
        if rule.value.pattern.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "filter value pattern cannot be empty".to_string(),
            ));
        }
        if let Some(field) = &rule.field {
            if field.pattern.is_empty() {
                return Err(ConfigError::InvalidPattern(
                    "filter field pattern cannot be empty".to_string(),
                ));
            }
        }
    }

    FilterChain::from_config(rules, Default::default(), allow_content)?;
    Ok(())
}

/// Validates checksum configuration
fn validate_checksum(settings: &ChecksumSettings) -> Result<(), ConfigError> {
    if let Some(path) = &settings.database_path {
        if path.is_empty() {
            return Err(ConfigError::Validation(
                "checksum database-path cannot be empty".to_string(),
            ));
        }
    }

    Checksummer::from_config(settings)?;
    Ok(())
}

/// Validates queue configuration
fn validate_queue(settings: &QueueSettings) -> Result<(), ConfigError> {
    if settings.directory.is_empty() {
        return Err(ConfigError::Validation(
            "queue directory cannot be empty".to_string(),
        ));
    }

    if settings.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            settings.batch_size
        )));
    }

    if settings.max_per_folder < 1 {
        return Err(ConfigError::Validation(format!(
            "max_per_folder must be >= 1, got {}",
            settings.max_per_folder
        )));
    }

    if settings.max_pending_batches < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pending_batches must be >= 1, got {}",
            settings.max_pending_batches
        )));
    }

    if settings.flush_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "flush_interval_ms must be >= 10ms, got {}ms",
            settings.flush_interval_ms
        )));
    }

    if settings.max_retry_delay_ms < settings.retry_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_retry_delay_ms ({}ms) must be >= retry_delay_ms ({}ms)",
            settings.max_retry_delay_ms, settings.retry_delay_ms
        )));
    }

    Ok(())
}
