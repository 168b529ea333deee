//! Two-pass certificate provisioning.
//!
//! # Ordering
//! ```text
//! acquire renewal lock
//!   pass 1: every domain needing issuance gets a placeholder
//!   bring-up: render + validate config, start proxy, wait until reachable
//!   pass 2: every domain still needing issuance is deleted, issued, reloaded
//! release renewal lock (guard drop, on every exit path)
//! ```
//!
//! Pass 1 completes for all domains before the proxy starts so a proxy
//! configuration referencing every domain can load. Pass 2 is best-effort
//! per domain: a failure is recorded and the next domain is processed.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::Instrument;

use crate::certs::classify::{classify, CertificateState, ClassifyError};
use crate::certs::issuer::{IssuanceError, IssueRequest, Issuer};
use crate::certs::lock::{LockError, RenewalLock};
use crate::certs::placeholder::generate_placeholder;
use crate::certs::store::CertificateStore;
use crate::config::schema::AppConfig;
use crate::observability::metrics;
use crate::proxy::controller::ProxyController;
use crate::proxy::process::ProxyError;

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("proxy bring-up failed: {0}")]
    Proxy(#[from] ProxyError),

    #[error("certificate store error for {domain}: {source}")]
    Store {
        domain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("placeholder generation failed: {0}")]
    Placeholder(#[from] rcgen::Error),

    #[error("aborted by operator before: {0}")]
    Aborted(Step),
}

/// Why a single domain did not end up with a valid certificate.
#[derive(Debug, Error)]
pub enum DomainFailure {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error("reload after issuance failed: {0}")]
    Reload(#[from] ProxyError),

    #[error("removing previous material failed: {0}")]
    Store(#[from] std::io::Error),
}

/// Final status of one domain.
#[derive(Debug)]
pub enum DomainStatus {
    Issued,
    AlreadyValid { days_left: i64 },
    Failed(DomainFailure),
}

#[derive(Debug)]
pub struct DomainOutcome {
    pub domain: String,
    pub status: DomainStatus,
}

/// Per-domain results of a run.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub outcomes: Vec<DomainOutcome>,
}

impl ProvisionReport {
    /// True when no domain failed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DomainFailure)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            DomainStatus::Failed(f) => Some((o.domain.as_str(), f)),
            _ => None,
        })
    }

    pub fn outcome(&self, domain: &str) -> Option<&DomainStatus> {
        self.outcomes
            .iter()
            .find(|o| o.domain == domain)
            .map(|o| &o.status)
    }
}

/// A mutating action the run is about to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    WritePlaceholder { domain: String },
    StartProxy,
    Reissue { domain: String },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::WritePlaceholder { domain } => write!(f, "writing placeholder certificate for {}", domain),
            Step::StartProxy => f.write_str("starting the proxy"),
            Step::Reissue { domain } => write!(f, "deleting and re-issuing the certificate for {}", domain),
        }
    }
}

/// Checkpoint consulted before each mutating step.
#[async_trait]
pub trait StepGate: Send + Sync {
    /// Return `false` to abort the run.
    async fn proceed(&self, step: &Step) -> bool;
}

/// Gate that never pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoProceed;

#[async_trait]
impl StepGate for AutoProceed {
    async fn proceed(&self, _step: &Step) -> bool {
        true
    }
}

/// Issuance options shared by every domain.
#[derive(Debug, Clone)]
struct IssueSettings {
    webroot: PathBuf,
    email: Option<String>,
    staging: bool,
    rsa_key_size: u32,
}

/// Orchestrates placeholder creation and real issuance for a domain set.
pub struct CertificateProvisioner {
    store: CertificateStore,
    lock: RenewalLock,
    issuer: Arc<dyn Issuer>,
    proxy: Arc<ProxyController>,
    gate: Arc<dyn StepGate>,
    settings: IssueSettings,
    margin_days: i64,
    placeholder_days: i64,
}

impl CertificateProvisioner {
    pub fn new(config: &AppConfig, issuer: Arc<dyn Issuer>, proxy: Arc<ProxyController>) -> Self {
        Self {
            store: CertificateStore::new(&config.paths.cert_root),
            lock: RenewalLock::new(&config.paths.lock_file, config.renewal.lock_stale_after),
            issuer,
            proxy,
            gate: Arc::new(AutoProceed),
            settings: IssueSettings {
                webroot: config.paths.webroot.clone(),
                email: config.email.clone(),
                staging: config.staging,
                rsa_key_size: config.issuer.rsa_key_size,
            },
            margin_days: config.renewal.margin_days,
            placeholder_days: config.renewal.placeholder_days,
        }
    }

    /// Replace the step gate (interactive test mode).
    pub fn with_gate(mut self, gate: Arc<dyn StepGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// Run both passes over `domains` under the renewal lock.
    pub async fn provision(&self, domains: &[String]) -> Result<ProvisionReport, ProvisionError> {
        async {
            let _guard = self.lock.acquire()?;
            tracing::info!(domains = domains.len(), staging = self.settings.staging, "Provisioning run started");

            let mut failed = self.placeholder_pass(domains).await?;
            self.bring_up().await?;
            let report = self.issuance_pass(domains, &mut failed).await?;

            tracing::info!(
                success = report.is_success(),
                failed = report.failures().count(),
                "Provisioning run finished"
            );
            Ok(report)
        }
        .instrument(tracing::info_span!("provisioner"))
        .await
    }

    /// Pass 1. Returns domains whose existing material could not be classified.
    async fn placeholder_pass(&self, domains: &[String]) -> Result<Vec<(String, DomainFailure)>, ProvisionError> {
        let mut failed = Vec::new();

        for domain in domains {
            let state = match classify(&self.store.domain_dir(domain), self.margin_days) {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(domain = %domain, error = %e, "Existing certificate is unreadable");
                    failed.push((domain.clone(), DomainFailure::Classify(e)));
                    continue;
                }
            };
            metrics::record_certificate_state(domain, state.as_str());

            if !state.needs_issuance() {
                tracing::info!(domain = %domain, state = %state, "Certificate is valid, leaving untouched");
                continue;
            }

            self.checkpoint(Step::WritePlaceholder { domain: domain.clone() }).await?;
            self.write_placeholder(domain)?;
            tracing::info!(domain = %domain, previous = %state, "Placeholder certificate created");
        }

        Ok(failed)
    }

    async fn bring_up(&self) -> Result<(), ProvisionError> {
        self.checkpoint(Step::StartProxy).await?;
        self.proxy.apply_config().await?;
        self.proxy.start().await?;
        self.proxy.wait_until_ready().await?;
        Ok(())
    }

    /// Pass 2.
    async fn issuance_pass(
        &self,
        domains: &[String],
        failed: &mut Vec<(String, DomainFailure)>,
    ) -> Result<ProvisionReport, ProvisionError> {
        let mut report = ProvisionReport::default();

        for domain in domains {
            if let Some(pos) = failed.iter().position(|(d, _)| d == domain) {
                let (domain, failure) = failed.remove(pos);
                report.outcomes.push(DomainOutcome {
                    domain,
                    status: DomainStatus::Failed(failure),
                });
                continue;
            }

            let status = self.issue_domain(domain).await?;
            if let DomainStatus::Failed(failure) = &status {
                tracing::error!(domain = %domain, error = %failure, "Certificate issuance failed");
            }
            report.outcomes.push(DomainOutcome {
                domain: domain.clone(),
                status,
            });
        }

        Ok(report)
    }

    async fn issue_domain(&self, domain: &str) -> Result<DomainStatus, ProvisionError> {
        // Re-read: pass 1 may have replaced it, or an operator pre-provisioned one.
        let state = match classify(&self.store.domain_dir(domain), self.margin_days) {
            Ok(state) => state,
            Err(e) => return Ok(DomainStatus::Failed(e.into())),
        };
        if let CertificateState::Valid { days_left } = state {
            tracing::info!(domain = %domain, days_left, "Certificate already valid, skipping issuance");
            return Ok(DomainStatus::AlreadyValid { days_left });
        }

        self.checkpoint(Step::Reissue { domain: domain.to_string() }).await?;

        if let Err(e) = self.store.remove(domain) {
            return Ok(DomainStatus::Failed(e.into()));
        }

        let request = IssueRequest {
            domain: domain.to_string(),
            webroot: self.settings.webroot.clone(),
            email: self.settings.email.clone(),
            staging: self.settings.staging,
            rsa_key_size: self.settings.rsa_key_size,
        };
        tracing::info!(domain = %domain, "Requesting certificate");

        if let Err(e) = self.issuer.issue(&request).await {
            metrics::record_issuance(domain, e.kind());
            // Keep the proxy configuration loadable while the domain has no real certificate.
            match self.write_placeholder(domain) {
                Ok(()) => tracing::warn!(domain = %domain, "Placeholder restored after failed issuance"),
                Err(restore) => tracing::error!(
                    domain = %domain,
                    error = %restore,
                    "Failed to restore placeholder after failed issuance"
                ),
            }
            return Ok(DomainStatus::Failed(e.into()));
        }
        metrics::record_issuance(domain, "issued");
        tracing::info!(domain = %domain, "Certificate issued");

        match self.proxy.reload().await {
            Ok(()) => {
                metrics::record_reload("provisioner", "success");
                Ok(DomainStatus::Issued)
            }
            Err(e) => {
                metrics::record_reload("provisioner", "failure");
                Ok(DomainStatus::Failed(e.into()))
            }
        }
    }

    fn write_placeholder(&self, domain: &str) -> Result<(), ProvisionError> {
        let placeholder = generate_placeholder(self.placeholder_days)?;
        self.store
            .write_placeholder(domain, &placeholder)
            .map_err(|source| ProvisionError::Store {
                domain: domain.to_string(),
                source,
            })
    }

    async fn checkpoint(&self, step: Step) -> Result<(), ProvisionError> {
        if self.gate.proceed(&step).await {
            Ok(())
        } else {
            tracing::warn!(step = %step, "Run aborted at checkpoint");
            Err(ProvisionError::Aborted(step))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success_and_failures() {
        let mut report = ProvisionReport::default();
        report.outcomes.push(DomainOutcome {
            domain: "a.example.com".into(),
            status: DomainStatus::Issued,
        });
        report.outcomes.push(DomainOutcome {
            domain: "b.example.com".into(),
            status: DomainStatus::AlreadyValid { days_left: 40 },
        });
        assert!(report.is_success());

        report.outcomes.push(DomainOutcome {
            domain: "c.example.com".into(),
            status: DomainStatus::Failed(DomainFailure::Issuance(IssuanceError::RateLimited(
                "too many".into(),
            ))),
        });
        assert!(!report.is_success());
        let failures: Vec<_> = report.failures().map(|(d, _)| d).collect();
        assert_eq!(failures, vec!["c.example.com"]);
        assert!(matches!(report.outcome("a.example.com"), Some(DomainStatus::Issued)));
    }

    #[test]
    fn test_step_display() {
        assert_eq!(
            Step::Reissue { domain: "example.com".into() }.to_string(),
            "deleting and re-issuing the certificate for example.com"
        );
    }
}
