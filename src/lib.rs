//! TLS certificate lifecycle manager for a reverse proxy.

pub mod certs;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod resilience;

pub use certs::{CertificateProvisioner, CertificateState, ProvisionReport};
pub use config::AppConfig;
pub use lifecycle::Shutdown;
pub use proxy::ProxyController;
