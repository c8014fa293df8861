//! Hookline Common - Shared types and utilities
//!
//! This crate provides configuration, the error taxonomy, and identifier
//! types shared across all Hookline components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
