//! Proxy process control and reachability probing.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use url::Url;

use crate::config::env_file::EnvMap;
use crate::config::schema::ProxyCommandConfig;

/// Errors from controlling the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Configuration failed the proxy's syntax check.
    #[error("proxy configuration is invalid: {0}")]
    Validation(String),

    #[error("`{command}` exited with status {status}: {output}")]
    Command {
        command: String,
        status: i32,
        output: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template rendering failed: {0}")]
    Render(#[from] std::io::Error),

    #[error("proxy not reachable at {url} after {waited:?}")]
    StartupTimeout { url: Url, waited: Duration },
}

/// Lifecycle operations on the proxy process.
#[async_trait]
pub trait ProxyProcess: Send + Sync {
    /// Start the proxy, or make sure it is running.
    async fn start(&self) -> Result<(), ProxyError>;

    /// Syntax-check the on-disk configuration. `Err(ProxyError::Validation)` when broken.
    async fn validate(&self) -> Result<(), ProxyError>;

    /// Signal the running proxy to reload its configuration.
    async fn reload(&self) -> Result<(), ProxyError>;
}

/// Lightweight reachability check against the proxy's own address.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_reachable(&self, url: &Url) -> bool;
}

/// Controls the proxy through configured shell commands.
#[derive(Debug, Clone)]
pub struct CommandProxy {
    commands: ProxyCommandConfig,
    env: EnvMap,
}

impl CommandProxy {
    pub fn new(commands: ProxyCommandConfig, env: EnvMap) -> Self {
        Self { commands, env }
    }

    async fn run(&self, command: &str) -> Result<String, ProxyError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProxyError::Spawn {
                command: command.to_string(),
                source,
            })?;

        // nginx reports on stderr even on success
        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let text = text.trim().to_string();

        if output.status.success() {
            Ok(text)
        } else {
            Err(ProxyError::Command {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                output: text,
            })
        }
    }
}

#[async_trait]
impl ProxyProcess for CommandProxy {
    async fn start(&self) -> Result<(), ProxyError> {
        self.run(&self.commands.start).await.map(|_| ())
    }

    async fn validate(&self) -> Result<(), ProxyError> {
        match self.run(&self.commands.test).await {
            Ok(_) => Ok(()),
            Err(ProxyError::Command { output, .. }) => Err(ProxyError::Validation(output)),
            Err(e) => Err(e),
        }
    }

    async fn reload(&self) -> Result<(), ProxyError> {
        self.run(&self.commands.reload).await.map(|_| ())
    }
}

/// HTTP readiness probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .no_proxy()
            .user_agent("proxy-certs-readiness")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn is_reachable(&self, url: &Url) -> bool {
        match self.client.get(url.clone()).send().await {
            // Any answer short of a server error means the proxy is serving.
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Readiness probe failed");
                false
            }
        }
    }
}
