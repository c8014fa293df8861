//! Hookline Storage - Persistence for the campaign engine
//!
//! Repository traits with PostgreSQL implementations, plus an in-memory
//! store implementing the same traits.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::{map_sqlx_error, DatabasePool};
pub use memory::MemoryStore;
pub use models::*;
pub use repository::mail_logs::{FailureReport, CANCELLED_ERROR, LEASE_EXHAUSTED_ERROR};
pub use repository::*;
