//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{DispatchConfig, LogOutput, LoggingConfig, WeaveConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &WeaveConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_plugin_ids(config)?;
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    Ok(())
}

/// Validates dispatch settings.
fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.max_pending_conversations == Some(0) {
        return Err(ConfigError::validation(
            "dispatch.max_pending_conversations must be greater than 0 when set",
        ));
    }
    Ok(())
}

/// Validates plugin keys.
fn validate_plugin_ids(config: &WeaveConfig) -> ConfigResult<()> {
    for id in config.plugins.keys() {
        if id.trim().is_empty() {
            return Err(ConfigError::validation("Plugin id cannot be empty"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginSettings;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&WeaveConfig::default()).is_ok());
    }

    #[test]
    fn test_file_output_requires_path() {
        let mut config = WeaveConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some("logs/weave.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_max_files_rejected() {
        let mut config = WeaveConfig::default();
        config.logging.max_files = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_zero_conversation_limit_rejected() {
        let mut config = WeaveConfig::default();
        config.dispatch.max_pending_conversations = Some(0);
        assert!(validate_config(&config).is_err());

        config.dispatch.max_pending_conversations = Some(16);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_blank_plugin_id_rejected() {
        let mut config = WeaveConfig::default();
        config.plugins.insert(" ".into(), PluginSettings::default());
        assert!(validate_config(&config).is_err());
    }
}
