//! Reverse-proxy control subsystem.
//!
//! # Data Flow
//! ```text
//! apply_config:  template.rs (render ${VAR}) → process.rs validate
//!                    └─ invalid → restore previous files, no reload
//! reload:        process.rs validate → process.rs reload
//! bring-up:      process.rs start → readiness probe until reachable or timeout
//! ```

pub mod controller;
pub mod process;
pub mod template;

pub use controller::ProxyController;
pub use process::{CommandProxy, HttpProbe, ProxyError, ProxyProcess, ReadinessProbe};
