//! Spool Common - Shared types and utilities
//!
//! This crate provides the configuration structures and error definitions
//! shared by the buffering core and the tools built on top of it.

pub mod config;
pub mod error;

pub use config::{Config, LogFormat, LoggingConfig, SpoolConfig};
pub use error::{Error, Result};
