//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! env file (KEY=VALUE)
//!     → env_file.rs (parse, validate keys)
//!     → loader.rs (overlay on process env, build typed config)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable, shared via Arc)
//!
//! watcher.rs observes templates, main config and certificate store
//!     → debounced burst → renewal lock free? → proxy apply + reload
//! ```
//!
//! # Design Decisions
//! - The env file never mutates the process environment; child processes
//!   receive the merged map explicitly
//! - All fields have defaults except the domain list
//! - Validation returns every failure, not just the first

pub mod env_file;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
