//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! provisioner / watcher / proxy controller
//!     → logging.rs (structured events inside per-component spans)
//!     → metrics.rs (counters, optional Prometheus endpoint)
//! ```

pub mod logging;
pub mod metrics;
