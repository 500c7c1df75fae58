//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (depth > 0, queue length > 0)
//! - Check that secure listeners have a certificate and a key
//! - Check endpoints split cleanly
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Endpoints are split but never resolved here; DNS is not a config concern

use std::fmt;

use crate::config::schema::{TlsOptionsConfig, TransportConfig};
use crate::net::endpoint::split_endpoint;
use crate::net::listener::ListenMode;
use crate::observability::logging::is_valid_level;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g., "server.cert_path").
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_endpoint(&mut errors, "client.endpoint", &config.client.endpoint);
    check_tls(&mut errors, "client.tls", &config.client.tls);

    check_endpoint(&mut errors, "server.bind_address", &config.server.bind_address);
    check_tls(&mut errors, "server.tls", &config.server.tls);
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than 0"));
    }
    if config.server.mode == ListenMode::Secure {
        if config.server.cert_path.is_none() {
            errors.push(ValidationError::new("server.cert_path", "required when mode is secure"));
        }
        if config.server.key_path.is_none() {
            errors.push(ValidationError::new("server.key_path", "required when mode is secure"));
        }
    }

    if !is_valid_level(&config.observability.log_level) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_endpoint(errors: &mut Vec<ValidationError>, field: &str, endpoint: &str) {
    if endpoint.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
        return;
    }
    if let Err(e) = split_endpoint(endpoint) {
        errors.push(ValidationError::new(field, e.to_string()));
    }
}

fn check_tls(errors: &mut Vec<ValidationError>, field: &str, tls: &TlsOptionsConfig) {
    if tls.verify_depth == 0 {
        errors.push(ValidationError::new(format!("{}.verify_depth", field), "must be greater than 0"));
    }
    if tls.cipher_list.as_deref().is_some_and(|list| list.trim().is_empty()) {
        errors.push(ValidationError::new(format!("{}.cipher_list", field), "must not be empty when set"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&TransportConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = TransportConfig::default();
        config.client.endpoint = String::new();
        config.server.max_connections = 0;
        config.server.mode = ListenMode::Secure;
        config.client.tls.verify_depth = 0;
        config.observability.log_level = "chatty".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "client.endpoint",
                "client.tls.verify_depth",
                "server.max_connections",
                "server.cert_path",
                "server.key_path",
                "observability.log_level",
            ]
        );
    }

    #[test]
    fn test_rejects_malformed_endpoint() {
        let mut config = TransportConfig::default();
        config.client.endpoint = "user@host:80".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "client.endpoint");
    }
}
