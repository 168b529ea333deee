//! Configuration schema definitions.
//!
//! `AppConfig` is built once from the merged environment (process env
//! overlaid with the env file) and shared read-only via `Arc`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::config::env_file::EnvMap;

/// Root configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Domains under management, in configuration order.
    pub domains: Vec<String>,

    /// Contact email for the certificate authority account.
    pub email: Option<String>,

    /// Use the authority's non-production endpoint.
    pub staging: bool,

    /// Certificate store paths.
    pub paths: PathConfig,

    /// Proxy process control.
    pub proxy: ProxyCommandConfig,

    /// Issuance collaborator settings.
    pub issuer: IssuerConfig,

    /// Readiness polling.
    pub readiness: ReadinessConfig,

    /// Renewal policy.
    pub renewal: RenewalConfig,

    /// Filesystem watcher settings.
    pub watch: WatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Merged environment, used for template substitution and child processes.
    pub env: EnvMap,
}

/// Filesystem layout.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Root of the certbot-style store (`live/`, `archive/`, `renewal/`).
    pub cert_root: PathBuf,

    /// Directory served for HTTP-01 challenges.
    pub webroot: PathBuf,

    /// Directory holding `*.template` proxy config files.
    pub template_dir: PathBuf,

    /// Directory rendered templates are written to.
    pub rendered_dir: PathBuf,

    /// The proxy's main configuration file.
    pub main_config: PathBuf,

    /// Renewal lock marker.
    pub lock_file: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            cert_root: PathBuf::from("/etc/letsencrypt"),
            webroot: PathBuf::from("/var/www/certbot"),
            template_dir: PathBuf::from("/etc/nginx/templates"),
            rendered_dir: PathBuf::from("/etc/nginx/conf.d"),
            main_config: PathBuf::from("/etc/nginx/nginx.conf"),
            lock_file: PathBuf::from("/tmp/proxy-certs.lock"),
        }
    }
}

/// Shell commands controlling the proxy process.
#[derive(Debug, Clone)]
pub struct ProxyCommandConfig {
    pub start: String,
    pub test: String,
    pub reload: String,
}

impl Default for ProxyCommandConfig {
    fn default() -> Self {
        Self {
            start: "nginx".to_string(),
            test: "nginx -t".to_string(),
            reload: "nginx -s reload".to_string(),
        }
    }
}

/// Issuance collaborator settings.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Command prefix, e.g. `certbot` or `docker compose run --rm certbot`.
    pub command: String,

    /// RSA key size requested for issued certificates.
    pub rsa_key_size: u32,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            command: "certbot".to_string(),
            rsa_key_size: 4096,
        }
    }
}

/// Readiness polling configuration.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub url: Url,
    pub interval: Duration,
    /// Overall deadline before `StartupTimeout`.
    pub timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost/").expect("static URL is valid"),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Certificate renewal policy.
#[derive(Debug, Clone)]
pub struct RenewalConfig {
    /// Certificates with fewer days left are re-issued.
    pub margin_days: i64,

    /// Lifetime of placeholder certificates.
    pub placeholder_days: i64,

    /// Age after which a lock marker is considered abandoned.
    pub lock_stale_after: Duration,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            margin_days: 7,
            placeholder_days: 1,
            lock_stale_after: Duration::from_secs(3600),
        }
    }
}

/// Filesystem watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet period that closes a burst of events.
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Prometheus exporter bind address; disabled when unset.
    pub metrics_address: Option<SocketAddr>,
}

impl AppConfig {
    /// Configuration with defaults for everything but the domain list.
    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            email: None,
            staging: false,
            paths: PathConfig::default(),
            proxy: ProxyCommandConfig::default(),
            issuer: IssuerConfig::default(),
            readiness: ReadinessConfig::default(),
            renewal: RenewalConfig::default(),
            watch: WatchConfig::default(),
            observability: ObservabilityConfig::default(),
            env: EnvMap::new(),
        }
    }

    /// Paths the config watcher observes.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        vec![
            self.paths.template_dir.clone(),
            self.paths.main_config.clone(),
            self.paths.cert_root.clone(),
        ]
    }
}
