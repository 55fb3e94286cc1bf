//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports > 0, intervals > 0)
//! - Check that blocked addresses parse as IPs or CIDR subnets
//! - Check error page keys are HTTP status codes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerDefaults → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServerDefaults;
use crate::security::access_control::parse_ip_rule;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
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

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServerDefaults) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be non-zero"));
    }
    if config.listener.https {
        if config.listener.https_port == 0 {
            errors.push(ValidationError::new("listener.https_port", "must be non-zero"));
        } else if config.listener.https_port == config.listener.port {
            errors.push(ValidationError::new(
                "listener.https_port",
                "must differ from listener.port",
            ));
        }
    }

    if config.web_root.as_os_str().is_empty() {
        errors.push(ValidationError::new("web_root", "must not be empty"));
    }

    for entry in &config.protection.blocked_ip {
        if parse_ip_rule(entry).is_none() {
            errors.push(ValidationError::new(
                "protection.blockedIP",
                format!("'{}' is neither an address nor a CIDR subnet", entry),
            ));
        }
    }

    for key in config.error_pages.pages.keys() {
        match key.parse::<u16>() {
            Ok(code) if (100..=599).contains(&code) => {}
            _ => errors.push(ValidationError::new(
                "error_pages",
                format!("'{}' is not an HTTP status code", key),
            )),
        }
    }

    if config.kv.snapshot_interval_secs == 0 {
        errors.push(ValidationError::new("kv.snapshot_interval_secs", "must be non-zero"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&ServerDefaults::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ServerDefaults::default();
        config.listener.port = 0;
        config.protection.blocked_ip = vec!["not-an-ip".into(), "10.0.0.0/8".into()];
        config.error_pages.pages.insert("abc".into(), "/x".into());
        config.kv.snapshot_interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.field == "protection.blockedIP"));
    }

    #[test]
    fn test_https_port_clash() {
        let mut config = ServerDefaults::default();
        config.listener.https = true;
        config.listener.https_port = config.listener.port;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "listener.https_port");
    }
}
