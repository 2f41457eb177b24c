use super::{types::Config, ConfigError};

/// Validate configuration
///
/// Beyond per-field sanity this checks the timing chain every job depends on:
/// soft timeout < hard timeout < staleness threshold.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.key.trim().is_empty() {
        return Err(invalid("rate_limit.key cannot be empty"));
    }
    for (name, class) in [("default", &rate_limit.default), ("write", &rate_limit.write)] {
        if class.limit == 0 || class.window_secs == 0 {
            return Err(invalid(format!(
                "rate_limit.{} needs a positive limit and window_secs",
                name
            )));
        }
    }

    config
        .orchestrator
        .validate()
        .map_err(|e| invalid(format!("orchestrator: {}", e)))?;
    config
        .scheduler
        .validate(config.orchestrator.staleness_threshold_secs)
        .map_err(|e| invalid(format!("scheduler: {}", e)))?;

    if config.provisioner.command.as_os_str().is_empty() {
        return Err(invalid("provisioner.command cannot be empty"));
    }

    let notifications = &config.notifications;
    if let Some(ref url) = notifications.webhook_url {
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("notifications.webhook_url must be an http(s) URL"));
        }
    }
    if notifications.max_attempts == 0 || notifications.buffer_size == 0 {
        return Err(invalid(
            "notifications.max_attempts and buffer_size must be at least 1",
        ));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobSchedule;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_hard_timeout_must_stay_below_staleness() {
        let mut config = Config::default();
        config.orchestrator.staleness_threshold_secs = 250;
        config.orchestrator.operation_timeout_secs = 100;
        config.scheduler.process_lifecycle = JobSchedule::new(60, 200, 300);

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("process_lifecycle"));
    }

    #[test]
    fn test_zero_rate_limit_fails() {
        let mut config = Config::default();
        config.rate_limit.write.limit = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_webhook_url_scheme() {
        let mut config = Config::default();
        config.notifications.webhook_url = Some("ftp://example.com".to_string());
        assert!(validate_config(&config).is_err());

        config.notifications.webhook_url = Some("https://example.com/hook".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
