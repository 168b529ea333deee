//! Startup orchestration.
//!
//! # Responsibilities
//! - Wire the proxy controller, issuer, provisioner and watcher from config
//! - Run the watcher in the background while provisioning runs in the foreground
//! - Keep watching until a shutdown signal unless running once
//!
//! # Design Decisions
//! - Fail fast: construction errors abort before any mutation
//! - The watcher is supervisory; its failures are logged, never returned
//! - Shutdown lets an in-flight reload finish

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::certs::issuer::{CertbotIssuer, Issuer};
use crate::certs::provisioner::{AutoProceed, CertificateProvisioner, ProvisionError, ProvisionReport, StepGate};
use crate::config::schema::AppConfig;
use crate::config::watcher::ConfigWatcher;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::proxy::controller::ProxyController;
use crate::proxy::process::{CommandProxy, HttpProbe, ProxyProcess, ReadinessProbe};

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Options from the command line.
pub struct RunOptions {
    /// Exit after provisioning instead of watching until a signal arrives.
    pub once: bool,
    pub gate: Arc<dyn StepGate>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            once: false,
            gate: Arc::new(AutoProceed),
        }
    }
}

/// The wired components.
pub struct Services {
    pub provisioner: CertificateProvisioner,
    pub watcher: ConfigWatcher,
}

impl Services {
    /// Wire components around the given collaborators.
    pub fn new(
        config: &AppConfig,
        process: Arc<dyn ProxyProcess>,
        probe: Arc<dyn ReadinessProbe>,
        issuer: Arc<dyn Issuer>,
    ) -> Self {
        let proxy = Arc::new(ProxyController::new(config, process, probe));
        Self {
            provisioner: CertificateProvisioner::new(config, issuer, proxy.clone()),
            watcher: ConfigWatcher::new(config, proxy),
        }
    }

    /// Wire components with the command-line proxy, HTTP probe and certbot issuer.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let process = Arc::new(CommandProxy::new(config.proxy.clone(), config.env.clone()));
        let probe = Arc::new(HttpProbe::new(PROBE_REQUEST_TIMEOUT)?);
        let issuer = Arc::new(CertbotIssuer::new(config.issuer.command.clone(), config.env.clone()));
        Ok(Self::new(config, process, probe, issuer))
    }
}

/// Run provisioning with the watcher alongside.
pub async fn run(config: &AppConfig, services: Services, options: RunOptions) -> Result<ProvisionReport, ProvisionError> {
    let Services { provisioner, watcher } = services;
    let provisioner = provisioner.with_gate(options.gate);

    let shutdown = Shutdown::new();
    let watcher_task = spawn_watcher(watcher, &shutdown);

    let result = provisioner.provision(&config.domains).await;

    match &result {
        Ok(report) => {
            for (domain, failure) in report.failures() {
                tracing::error!(domain = %domain, error = %failure, "Domain not provisioned");
            }
            if !options.once {
                tracing::info!("Provisioning done, watching for changes");
                shutdown_signal().await;
            }
        }
        Err(e) => tracing::error!(error = %e, "Provisioning aborted"),
    }

    shutdown.trigger();
    if let Err(e) = watcher_task.await {
        tracing::error!(error = %e, "Watcher task panicked");
    }

    result
}

fn spawn_watcher(watcher: ConfigWatcher, shutdown: &Shutdown) -> JoinHandle<()> {
    let listener = shutdown.subscribe();
    tokio::spawn(async move {
        if let Err(e) = watcher.run(listener).await {
            tracing::error!(error = %e, "Config watcher could not start");
        }
    })
}
