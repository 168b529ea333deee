//! Configuration loading from the env file and process environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::env_file::{parse_env_file, EnvMap};
use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: process environment overlaid with `env_file`, then validated.
pub fn load_config(env_file: &Path) -> Result<AppConfig, ConfigError> {
    let file_vars = parse_env_file(env_file).map_err(|source| ConfigError::Io {
        path: env_file.to_path_buf(),
        source,
    })?;

    let mut env: EnvMap = std::env::vars().collect();
    env.extend(file_vars);

    let config = from_env(env)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build an `AppConfig` from a merged env map. Does not validate.
pub fn from_env(env: EnvMap) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::with_domains(parse_domains(
        env.get("DOMAINS").map(String::as_str).unwrap_or_default(),
    ));

    config.email = env
        .get("CERTBOT_EMAIL")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    config.staging = parse_flag(&env, "STAGING")?.unwrap_or(false);

    let paths = &mut config.paths;
    set_path(&env, "CERT_ROOT", &mut paths.cert_root);
    set_path(&env, "WEBROOT", &mut paths.webroot);
    set_path(&env, "TEMPLATE_DIR", &mut paths.template_dir);
    set_path(&env, "RENDERED_DIR", &mut paths.rendered_dir);
    set_path(&env, "PROXY_MAIN_CONFIG", &mut paths.main_config);
    set_path(&env, "RENEWAL_LOCK_FILE", &mut paths.lock_file);

    set_string(&env, "PROXY_START_COMMAND", &mut config.proxy.start);
    set_string(&env, "PROXY_TEST_COMMAND", &mut config.proxy.test);
    set_string(&env, "PROXY_RELOAD_COMMAND", &mut config.proxy.reload);
    set_string(&env, "ISSUER_COMMAND", &mut config.issuer.command);
    if let Some(size) = parse_value::<u32>(&env, "RSA_KEY_SIZE")? {
        config.issuer.rsa_key_size = size;
    }

    if let Some(url) = parse_value::<Url>(&env, "READINESS_URL")? {
        config.readiness.url = url;
    }
    if let Some(d) = parse_secs(&env, "READINESS_INTERVAL_SECS")? {
        config.readiness.interval = d;
    }
    if let Some(d) = parse_secs(&env, "READINESS_TIMEOUT_SECS")? {
        config.readiness.timeout = d;
    }

    if let Some(days) = parse_value::<i64>(&env, "RENEWAL_MARGIN_DAYS")? {
        config.renewal.margin_days = days;
    }
    if let Some(days) = parse_value::<i64>(&env, "PLACEHOLDER_DAYS")? {
        config.renewal.placeholder_days = days;
    }
    if let Some(d) = parse_secs(&env, "RENEWAL_LOCK_STALE_SECS")? {
        config.renewal.lock_stale_after = d;
    }

    if let Some(d) = parse_secs(&env, "WATCH_DEBOUNCE_SECS")? {
        config.watch.debounce = d;
    }

    config.observability.metrics_address = parse_value::<SocketAddr>(&env, "METRICS_ADDRESS")?;

    config.env = env;
    Ok(config)
}

/// Split a domain list on whitespace and commas, dropping duplicates.
pub fn parse_domains(raw: &str) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    for d in raw.split(|c: char| c.is_whitespace() || c == ',') {
        let d = d.trim().trim_end_matches('.').to_ascii_lowercase();
        if !d.is_empty() && !domains.contains(&d) {
            domains.push(d);
        }
    }
    domains
}

fn non_empty<'a>(env: &'a EnvMap, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn set_path(env: &EnvMap, key: &str, target: &mut PathBuf) {
    if let Some(v) = non_empty(env, key) {
        *target = PathBuf::from(v);
    }
}

fn set_string(env: &EnvMap, key: &str, target: &mut String) {
    if let Some(v) = non_empty(env, key) {
        *target = v.to_string();
    }
}

fn parse_value<T>(env: &EnvMap, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty(env, key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key,
                value: raw.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_secs(env: &EnvMap, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_value::<u64>(env, key)?.map(Duration::from_secs))
}

fn parse_flag(env: &EnvMap, key: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = non_empty(env, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_domain_list_parsing() {
        assert_eq!(
            parse_domains("Example.com, www.example.com\n api.example.com example.com"),
            vec!["example.com", "www.example.com", "api.example.com"]
        );
        assert!(parse_domains("  ").is_empty());
    }

    #[test]
    fn test_from_env_overrides_defaults() {
        let config = from_env(env(&[
            ("DOMAINS", "example.com"),
            ("CERTBOT_EMAIL", "ops@example.com"),
            ("STAGING", "yes"),
            ("CERT_ROOT", "/srv/certs"),
            ("READINESS_TIMEOUT_SECS", "60"),
            ("RENEWAL_MARGIN_DAYS", "14"),
            ("METRICS_ADDRESS", "127.0.0.1:9100"),
        ]))
        .unwrap();

        assert_eq!(config.domains, vec!["example.com"]);
        assert_eq!(config.email.as_deref(), Some("ops@example.com"));
        assert!(config.staging);
        assert_eq!(config.paths.cert_root, PathBuf::from("/srv/certs"));
        assert_eq!(config.readiness.timeout, Duration::from_secs(60));
        assert_eq!(config.renewal.margin_days, 14);
        assert!(config.observability.metrics_address.is_some());
        assert_eq!(config.env["CERT_ROOT"], "/srv/certs");
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = from_env(env(&[("DOMAINS", "example.com"), ("WATCH_DEBOUNCE_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "WATCH_DEBOUNCE_SECS", .. }));
    }

    #[test]
    fn test_load_config_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "DOMAINS=not_a_domain\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
