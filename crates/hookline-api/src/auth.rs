//! Authentication module

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use hookline_core::Engine;
use hookline_storage::DatabasePool;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    /// SHA-256 of the owner API bearer token; owner routes are closed when unset
    pub admin_token_hash: Option<String>,
    /// Checked by the readiness probe when the engine runs on Postgres
    pub db_pool: Option<DatabasePool>,
}

impl AppState {
    pub fn new(engine: Engine, admin_token: Option<&str>, db_pool: Option<DatabasePool>) -> Self {
        Self {
            engine,
            admin_token_hash: admin_token.map(hash_token),
            db_pool,
        }
    }
}

/// Extract the bearer token from a request
pub fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Hash a token for comparison
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn verify_token(token: &str, stored_hash: &str) -> bool {
    let presented = hash_token(token);
    presented.len() == stored_hash.len()
        && presented
            .bytes()
            .zip(stored_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Authentication middleware for owner routes
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token_hash.as_deref() else {
        warn!(path = %request.uri().path(), "Owner API called but no admin token is configured");
        return Err(ApiError::unauthorized());
    };

    let token = extract_bearer_token(&request).ok_or_else(|| {
        warn!(path = %request.uri().path(), "Missing bearer token");
        ApiError::unauthorized()
    })?;

    if !verify_token(token, expected) {
        warn!(path = %request.uri().path(), "Bearer token mismatch");
        return Err(ApiError::unauthorized());
    }

    Ok(next.run(request).await)
}
