//! Error types for Hookline

use thiserror::Error;

/// Main error type for Hookline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    /// The store could not be reached (pool exhausted, connection dropped).
    /// Callers on the scheduler path retry on the next tick.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Hookline
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::StoreUnavailable(_) => 503,
            Error::DuplicateKey(_) => 409,
            Error::Validation(_) => 422,
            Error::NotFound(_) => 404,
            Error::Template(_) => 422,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::DuplicateKey(_) => "DUPLICATE_KEY",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Template(_) => "TEMPLATE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry on the next scheduler tick may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::DuplicateKey("x".into()).status_code(), 409);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::StoreUnavailable("x".into()).status_code(), 503);
        assert_eq!(Error::NotFound("x".into()).code(), "NOT_FOUND");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::StoreUnavailable("down".into()).is_retryable());
        assert!(!Error::DuplicateKey("dup".into()).is_retryable());
    }
}
