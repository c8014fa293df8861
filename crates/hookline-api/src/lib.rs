//! Hookline API - HTTP surface of the campaign engine
//!
//! Unauthenticated tracking callbacks keyed by rId, the bearer-protected
//! owner API for launching and inspecting campaigns, and health probes.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
