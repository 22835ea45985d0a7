//! Core error type shared across the caching engine.
//!
//! Every failure that can reach a client maps onto one of these variants,
//! and every variant maps 1:1 onto an HTTP status code. Components that
//! probe several alternatives (cache tiers, fallback lockers) capture the
//! error value locally and decide whether to surface or swallow it.

use thiserror::Error;

/// Engine-wide error, tagged with the HTTP status it translates to.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Malformed or unresolvable request parameters (400).
    #[error("{0}")]
    BadRequest(String),

    /// Requested entity does not exist (404).
    #[error("{0}")]
    NotFound(String),

    /// Request method is not GET or POST (405).
    #[error("{0}")]
    MethodNotAllowed(String),

    /// Request body exceeds the configured limit (413).
    #[error("{0}")]
    TooLarge(String),

    /// Backend or engine failure (500).
    #[error("{0}")]
    Internal(String),

    /// Resource exhaustion or upstream unavailability (503).
    #[error("{0}")]
    Unavailable(String),
}

impl Error {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::MethodNotAllowed(_) => 405,
            Error::TooLarge(_) => 413,
            Error::Internal(_) => 500,
            Error::Unavailable(_) => 503,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::BadRequest("x".into()).status_code(), 400);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::MethodNotAllowed("x".into()).status_code(), 405);
        assert_eq!(Error::TooLarge("x".into()).status_code(), 413);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
        assert_eq!(Error::Unavailable("x".into()).status_code(), 503);
    }

    #[test]
    fn test_display_carries_message() {
        let err = Error::NotFound("tileset \"roads\" not found".into());
        assert_eq!(err.to_string(), "tileset \"roads\" not found");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("denied"));
    }
}
