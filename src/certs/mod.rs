//! Certificate lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! provisioner.rs (two passes under lock.rs)
//!     → classify.rs   (missing / placeholder / expiring-soon / valid)
//!     → placeholder.rs + store.rs   (pass 1: self-signed stand-ins)
//!     → proxy bring-up
//!     → issuer.rs + store.rs   (pass 2: delete, issue, reload)
//! ```
//!
//! # Design Decisions
//! - Classification is recomputed on every check, never cached
//! - Replacement is destructive: old material is removed before new is written
//! - One domain's issuance failure does not stop the others

pub mod classify;
pub mod issuer;
pub mod lock;
pub mod placeholder;
pub mod provisioner;
pub mod store;

pub use classify::{CertificateState, ClassifyError};
pub use issuer::{CertbotIssuer, IssuanceError, IssueRequest, Issuer};
pub use lock::{LockError, LockState, RenewalLock};
pub use provisioner::{CertificateProvisioner, DomainFailure, DomainStatus, ProvisionError, ProvisionReport};
pub use store::CertificateStore;
