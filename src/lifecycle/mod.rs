//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Wire components → spawn watcher → provision → wait for signal
//!
//! Shutdown (shutdown.rs):
//!     Signal received → watcher stops taking new cycles → in-flight reload finishes
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger cooperative shutdown
//!
//! Operator interaction (prompt.rs, clean.rs):
//!     --test pauses before each mutation, --clean removes generated state
//! ```

pub mod clean;
pub mod prompt;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownListener};
