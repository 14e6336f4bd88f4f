//! comply-core: Shared foundations for the compliance middleware.
//!
//! This crate provides the pieces every compliance component builds on:
//! - The tagged error type (`ComplianceError` + `ErrorKind`)
//! - Middleware configuration loading
//! - Crash-safe file persistence (atomic replace, write-once, quarantine)

pub mod config;
pub mod error;
pub mod persist;

pub use config::MiddlewareConfig;
pub use error::{ComplianceError, ErrorKind, Result};
