//! Validate-then-apply control of the running proxy.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Instrument;

use crate::config::env_file::EnvMap;
use crate::config::schema::{AppConfig, ReadinessConfig};
use crate::proxy::process::{ProxyError, ProxyProcess, ReadinessProbe};
use crate::proxy::template::render_templates;
use crate::resilience::timeouts::poll_until;

/// Drives the proxy process. A configuration that fails validation is never applied.
pub struct ProxyController {
    process: Arc<dyn ProxyProcess>,
    probe: Arc<dyn ReadinessProbe>,
    template_dir: PathBuf,
    rendered_dir: PathBuf,
    env: EnvMap,
    readiness: ReadinessConfig,
}

impl ProxyController {
    pub fn new(config: &AppConfig, process: Arc<dyn ProxyProcess>, probe: Arc<dyn ReadinessProbe>) -> Self {
        Self {
            process,
            probe,
            template_dir: config.paths.template_dir.clone(),
            rendered_dir: config.paths.rendered_dir.clone(),
            env: config.env.clone(),
            readiness: config.readiness.clone(),
        }
    }

    /// Render templates and validate the result.
    ///
    /// On validation failure the previously rendered files are put back, so
    /// the on-disk configuration matches what the proxy is running.
    pub async fn apply_config(&self) -> Result<(), ProxyError> {
        async {
            let rendered = render_templates(&self.template_dir, &self.rendered_dir, &self.env)?;
            tracing::debug!(files = ?rendered.paths().collect::<Vec<_>>(), "Templates rendered");

            match self.process.validate().await {
                Ok(()) => Ok(()),
                Err(e) => {
                    if let Err(restore_err) = rendered.restore() {
                        tracing::error!(error = %restore_err, "Failed to restore previous configuration");
                    }
                    Err(e)
                }
            }
        }
        .instrument(tracing::info_span!("proxy"))
        .await
    }

    /// Reload the proxy after the current on-disk configuration validates.
    pub async fn reload(&self) -> Result<(), ProxyError> {
        async {
            self.process.validate().await?;
            self.process.reload().await?;
            tracing::info!("Proxy reloaded");
            Ok(())
        }
        .instrument(tracing::info_span!("proxy"))
        .await
    }

    /// Render, validate, then reload: the atomic test-then-apply operation.
    pub async fn apply_and_reload(&self) -> Result<(), ProxyError> {
        self.apply_config().await?;
        async {
            self.process.reload().await?;
            tracing::info!("Proxy reloaded with fresh configuration");
            Ok(())
        }
        .instrument(tracing::info_span!("proxy"))
        .await
    }

    /// Ensure the proxy is running. A proxy already answering on the
    /// readiness URL is left alone.
    pub async fn start(&self) -> Result<(), ProxyError> {
        async {
            if self.probe.is_reachable(&self.readiness.url).await {
                tracing::info!(url = %self.readiness.url, "Proxy already running, not starting another");
                return Ok(());
            }
            tracing::info!("Starting proxy");
            self.process.start().await
        }
        .instrument(tracing::info_span!("proxy"))
        .await
    }

    /// Poll the readiness URL until it answers or the deadline passes.
    pub async fn wait_until_ready(&self) -> Result<(), ProxyError> {
        let url = &self.readiness.url;
        let probe = &self.probe;

        async {
            tracing::info!(url = %url, timeout = ?self.readiness.timeout, "Waiting for proxy to become reachable");
            match poll_until(self.readiness.interval, self.readiness.timeout, move || probe.is_reachable(url)).await {
                Ok(attempts) => {
                    tracing::info!(url = %url, attempts, "Proxy is reachable");
                    Ok(())
                }
                Err(elapsed) => Err(ProxyError::StartupTimeout {
                    url: url.clone(),
                    waited: elapsed.waited,
                }),
            }
        }
        .instrument(tracing::info_span!("proxy"))
        .await
    }
}
