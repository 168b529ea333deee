//! Certificate authority issuance collaborator.
//!
//! The protocol itself is delegated to an external ACME client; this module
//! only builds the invocation and classifies its failures.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::env_file::EnvMap;

/// Issuance failures, classified for logs and metrics.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("rate limited by certificate authority: {0}")]
    RateLimited(String),

    #[error("domain validation failed: {0}")]
    ValidationFailed(String),

    #[error("network error talking to certificate authority: {0}")]
    Network(String),

    #[error("issuer exited with status {status}: {detail}")]
    Failed { status: i32, detail: String },

    #[error("failed to run issuer: {0}")]
    Spawn(#[from] std::io::Error),
}

impl IssuanceError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IssuanceError::RateLimited(_) => "rate_limited",
            IssuanceError::ValidationFailed(_) => "validation_failed",
            IssuanceError::Network(_) => "network",
            IssuanceError::Failed { .. } => "failed",
            IssuanceError::Spawn(_) => "spawn",
        }
    }
}

/// Everything the issuer needs for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub domain: String,
    pub webroot: PathBuf,
    pub email: Option<String>,
    pub staging: bool,
    pub rsa_key_size: u32,
}

/// Performs webroot-validated issuance, writing material into the store.
#[async_trait]
pub trait Issuer: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<(), IssuanceError>;
}

/// Issuer backed by the `certbot` CLI (or a wrapper running it).
#[derive(Debug, Clone)]
pub struct CertbotIssuer {
    command: String,
    env: EnvMap,
}

impl CertbotIssuer {
    /// `command` is a shell prefix such as `certbot` or `docker compose run --rm certbot`.
    pub fn new(command: impl Into<String>, env: EnvMap) -> Self {
        Self {
            command: command.into(),
            env,
        }
    }

    /// Full shell command line for `request`.
    pub fn command_line(&self, request: &IssueRequest) -> String {
        let mut args = vec![
            self.command.clone(),
            "certonly".to_string(),
            "--webroot".to_string(),
            "-w".to_string(),
            shell_quote(&request.webroot.to_string_lossy()),
            "-d".to_string(),
            shell_quote(&request.domain),
        ];
        match &request.email {
            Some(email) => {
                args.push("--email".to_string());
                args.push(shell_quote(email));
            }
            None => args.push("--register-unsafely-without-email".to_string()),
        }
        args.push("--rsa-key-size".to_string());
        args.push(request.rsa_key_size.to_string());
        args.push("--agree-tos".to_string());
        args.push("--force-renewal".to_string());
        args.push("--non-interactive".to_string());
        if request.staging {
            args.push("--staging".to_string());
        }
        args.join(" ")
    }
}

#[async_trait]
impl Issuer for CertbotIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<(), IssuanceError> {
        let line = self.command_line(request);
        tracing::debug!(domain = %request.domain, command = %line, "Invoking issuer");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let mut detail = String::from_utf8_lossy(&output.stderr).into_owned();
        detail.push_str(&String::from_utf8_lossy(&output.stdout));
        Err(classify_failure(output.status.code().unwrap_or(-1), detail.trim()))
    }
}

/// Map issuer output to an error class.
pub fn classify_failure(status: i32, output: &str) -> IssuanceError {
    let lower = output.to_ascii_lowercase();
    let detail = last_line(output);

    if lower.contains("too many certificates")
        || lower.contains("ratelimited")
        || lower.contains("rate limit")
    {
        IssuanceError::RateLimited(detail)
    } else if lower.contains("challenge failed")
        || lower.contains("some challenges have failed")
        || lower.contains("unauthorized")
    {
        IssuanceError::ValidationFailed(detail)
    } else if lower.contains("connection refused")
        || lower.contains("timed out")
        || lower.contains("temporary failure in name resolution")
        || lower.contains("network")
    {
        IssuanceError::Network(detail)
    } else {
        IssuanceError::Failed { status, detail }
    }
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn shell_quote(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./@:+".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(staging: bool, email: Option<&str>) -> IssueRequest {
        IssueRequest {
            domain: "example.com".into(),
            webroot: PathBuf::from("/var/www/certbot"),
            email: email.map(String::from),
            staging,
            rsa_key_size: 4096,
        }
    }

    #[test]
    fn test_command_line_with_email() {
        let issuer = CertbotIssuer::new("certbot", EnvMap::new());
        let line = issuer.command_line(&request(false, Some("ops@example.com")));
        assert_eq!(
            line,
            "certbot certonly --webroot -w /var/www/certbot -d example.com \
             --email ops@example.com --rsa-key-size 4096 --agree-tos --force-renewal --non-interactive"
        );
    }

    #[test]
    fn test_command_line_staging_without_email() {
        let issuer = CertbotIssuer::new("docker compose run --rm certbot", EnvMap::new());
        let line = issuer.command_line(&request(true, None));
        assert!(line.starts_with("docker compose run --rm certbot certonly"));
        assert!(line.contains("--register-unsafely-without-email"));
        assert!(line.ends_with("--staging"));
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            classify_failure(1, "Error creating new order :: too many certificates already issued"),
            IssuanceError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(1, "Some challenges have failed.\nDetail: 404"),
            IssuanceError::ValidationFailed(_)
        ));
        assert!(matches!(
            classify_failure(1, "Connection refused while contacting acme-v02"),
            IssuanceError::Network(_)
        ));
        match classify_failure(2, "something odd\n\n") {
            IssuanceError::Failed { status, detail } => {
                assert_eq!(status, 2);
                assert_eq!(detail, "something odd");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/var/www"), "/var/www");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_classified() {
        let issuer = CertbotIssuer::new("echo 'Challenge failed for domain' >&2; false;", EnvMap::new());
        let err = issuer.issue(&request(true, None)).await.unwrap_err();
        assert!(matches!(err, IssuanceError::ValidationFailed(_)));
    }
}
