//! Resilience subsystem.
//!
//! # Design Decisions
//! - Every wait on an external party has a deadline
//! - Deadline expiry is reported distinctly from a failed attempt

pub mod timeouts;
