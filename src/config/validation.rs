//! Configuration validation.
//!
//! Semantic checks run after the env map has been converted into an
//! `AppConfig`. All failures are collected, not just the first.

use std::fmt;

use crate::config::schema::AppConfig;

const RSA_KEY_SIZES: [u32; 3] = [2048, 3072, 4096];

/// A single semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a fully-built configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.domains.is_empty() {
        errors.push(ValidationError::new("DOMAINS", "at least one domain is required"));
    }
    for domain in &config.domains {
        if !is_valid_domain(domain) {
            errors.push(ValidationError::new(
                "DOMAINS",
                format!("'{}' is not a valid DNS name", domain),
            ));
        }
    }

    if let Some(email) = &config.email {
        if !email.contains('@') {
            errors.push(ValidationError::new(
                "CERTBOT_EMAIL",
                format!("'{}' is not an email address", email),
            ));
        }
    }

    match config.readiness.url.scheme() {
        "http" | "https" => {}
        other => errors.push(ValidationError::new(
            "READINESS_URL",
            format!("unsupported scheme '{}'", other),
        )),
    }
    if config.readiness.interval.is_zero() {
        errors.push(ValidationError::new("READINESS_INTERVAL_SECS", "must be > 0"));
    }
    if config.readiness.timeout < config.readiness.interval {
        errors.push(ValidationError::new(
            "READINESS_TIMEOUT_SECS",
            "must be at least the polling interval",
        ));
    }
    if config.watch.debounce.is_zero() {
        errors.push(ValidationError::new("WATCH_DEBOUNCE_SECS", "must be > 0"));
    }
    if config.renewal.margin_days <= 0 {
        errors.push(ValidationError::new("RENEWAL_MARGIN_DAYS", "must be > 0"));
    }
    if config.renewal.placeholder_days <= 0 {
        errors.push(ValidationError::new("PLACEHOLDER_DAYS", "must be > 0"));
    }
    if config.renewal.lock_stale_after.is_zero() {
        errors.push(ValidationError::new("RENEWAL_LOCK_STALE_SECS", "must be > 0"));
    }
    if !RSA_KEY_SIZES.contains(&config.issuer.rsa_key_size) {
        errors.push(ValidationError::new(
            "RSA_KEY_SIZE",
            format!("{} is not one of 2048, 3072, 4096", config.issuer.rsa_key_size),
        ));
    }
    for (field, cmd) in [
        ("ISSUER_COMMAND", &config.issuer.command),
        ("PROXY_START_COMMAND", &config.proxy.start),
        ("PROXY_TEST_COMMAND", &config.proxy.test),
        ("PROXY_RELOAD_COMMAND", &config.proxy.reload),
    ] {
        if cmd.trim().is_empty() {
            errors.push(ValidationError::new(field, "command must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Hostname syntax check (RFC 1123 labels, at most 253 octets).
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::with_domains(["example.com"]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = AppConfig::with_domains(["bad_domain", "-lead.example.com"]);
        config.issuer.rsa_key_size = 1024;
        config.watch.debounce = Duration::ZERO;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.field == "RSA_KEY_SIZE"));
        assert!(errors.iter().any(|e| e.field == "WATCH_DEBOUNCE_SECS"));
    }

    #[test]
    fn test_empty_domains_rejected() {
        let config = AppConfig::with_domains(Vec::<String>::new());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "DOMAINS");
    }

    #[test]
    fn test_domain_syntax() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("a-b.c-d.example"));
        assert!(is_valid_domain("localhost"));
        assert!(!is_valid_domain("example..com"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(!is_valid_domain(&"a".repeat(64)));
    }
}
