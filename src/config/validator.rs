use crate::config::Config;
use crate::error::{IpScopeError, Result, ValidationError};
use std::net::SocketAddr;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_server(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_lookup(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(IpScopeError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.server.bind.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "Bind address must be host:port, got '{}'",
                    config.server.bind
                ),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_path",
                "Database path cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_lookup(config: &Config, errors: &mut Vec<ValidationError>) {
        let url = &config.lookup.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError::new(
                "lookup.base_url",
                format!("Base URL must start with http:// or https://, got '{}'", url),
            ));
        }

        if config.lookup.api_key_env.is_empty() {
            errors.push(ValidationError::new(
                "lookup.api_key_env",
                "API key environment variable name cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_bind() {
        let mut config = Config::default();
        config.server.bind = "localhost".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_violation() {
        let mut config = Config::default();
        config.storage.database_path = PathBuf::new();
        config.storage.pool_size = 0;
        config.lookup.base_url = "ftp://example.com".to_string();

        match ConfigValidator::validate(&config) {
            Err(IpScopeError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec![
                        "storage.database_path",
                        "storage.pool_size",
                        "lookup.base_url"
                    ]
                );
            }
            other => panic!("Expected validation failure, got {:?}", other),
        }
    }
}
