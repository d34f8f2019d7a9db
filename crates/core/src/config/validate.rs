use super::{types::Config, ConfigError, TransferBackend};

/// Validate configuration
/// Currently validates:
/// - Transfer section exists (enforced by serde)
/// - Backend-specific config is present and usable
/// - Worker capacity and retry policy are sane
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Transfer validation
    match config.transfer.backend {
        TransferBackend::Slskd => {
            let slskd = config.transfer.slskd.as_ref().ok_or_else(|| {
                ConfigError::ValidationError(
                    "transfer.slskd is required when backend = \"slskd\"".to_string(),
                )
            })?;
            if slskd.url.is_empty() {
                return Err(ConfigError::ValidationError(
                    "transfer.slskd.url cannot be empty".to_string(),
                ));
            }
            if slskd.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(
                    "transfer.slskd.timeout_secs cannot be 0".to_string(),
                ));
            }
        }
    }

    // Orchestrator validation
    let orch = &config.orchestrator;
    if orch.worker_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.worker_capacity cannot be 0".to_string(),
        ));
    }
    if orch.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.poll_interval_ms cannot be 0".to_string(),
        ));
    }
    if orch.abort_ack_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.abort_ack_timeout_ms cannot be 0".to_string(),
        ));
    }
    if orch.retry.multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.retry.multiplier must be at least 1.0".to_string(),
        ));
    }
    if orch.retry.base_delay_ms > orch.retry.max_delay_ms {
        return Err(ConfigError::ValidationError(
            "orchestrator.retry.base_delay_ms cannot exceed max_delay_ms".to_string(),
        ));
    }

    // Events validation
    if config.events.replay_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "events.replay_buffer cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn valid_config() -> Config {
        load_config_from_str(
            r#"
[transfer]
backend = "slskd"

[transfer.slskd]
url = "http://localhost:5030"
api_key = "key"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_missing_slskd_section_fails() {
        let mut config = valid_config();
        config.transfer.slskd = None;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_empty_url_fails() {
        let mut config = valid_config();
        config.transfer.slskd.as_mut().unwrap().url.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_capacity_fails() {
        let mut config = valid_config();
        config.orchestrator.worker_capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_submultiplicative_backoff_fails() {
        let mut config = valid_config();
        config.orchestrator.retry.multiplier = 0.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_base_delay_above_cap_fails() {
        let mut config = valid_config();
        config.orchestrator.retry.base_delay_ms = 1_000_000;
        config.orchestrator.retry.max_delay_ms = 1000;
        assert!(validate_config(&config).is_err());
    }
}
