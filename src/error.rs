//! Request-level error taxonomy.
//!
//! Four caller-visible classes, mapped onto HTTP statuses by the gateway:
//! - identity failures collapse into one uniform message so the caller
//!   cannot distinguish "unknown id" from "bad code" from "broken alias"
//! - authorization failures are distinct (the identity itself was valid)
//! - policy-guard rejections carry the specific reason
//! - malformed input carries a descriptive message
//!
//! Transient I/O errors never appear here: background tasks log and
//! retry on their next tick, and no handler waits on them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Uniform rejection text for all identity failures.
pub const INVALID_CREDENTIALS: &str = "Invalid id or access code";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Unknown id, expired/invalid code, or broken alias chain.
    #[error("{INVALID_CREDENTIALS}")]
    InvalidCredentials,

    /// Valid identity, insufficient role.
    #[error("Unauthorized user")]
    Unauthorized,

    /// Policy guard rejected the operation (e.g. last administrator).
    #[error("{0}")]
    Rejected(String),

    /// Unparseable or out-of-range request input.
    #[error("{0}")]
    BadRequest(String),
}

impl RequestError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_errors_share_one_message() {
        assert_eq!(RequestError::InvalidCredentials.to_string(), INVALID_CREDENTIALS);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(RequestError::InvalidCredentials.status(), StatusCode::BAD_REQUEST);
        assert_eq!(RequestError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            RequestError::rejected("Cannot delete the last administrator").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RequestError::bad_request("not a number").status(), StatusCode::BAD_REQUEST);
    }
}
