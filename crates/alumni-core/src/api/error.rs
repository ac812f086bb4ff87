use reqwest::header::InvalidHeaderValue;
use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StoreError;
use crate::models::FieldError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request path: {0}")]
    InvalidPath(String),

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Stored access token is not a valid header value")]
    InvalidToken(#[from] InvalidHeaderValue),

    #[error("Credential storage failed: {0}")]
    Storage(#[from] StoreError),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        ApiError::Http {
            status,
            body: Self::truncate_body(body),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            _ => None,
        }
    }

    /// True when the user has to log in again: a 401 that survived the
    /// refresh-and-retry, or a failed refresh.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
            || self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ApiError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_keeps_short_body() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, "no such user");
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.to_string(), "HTTP 404 Not Found: no such user");
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_from_status_truncates_long_body() {
        let body = "x".repeat(2000);
        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body);
        let ApiError::Http { body: kept, .. } = err else {
            panic!("expected Http error");
        };
        assert!(kept.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(kept.ends_with("(truncated, 2000 total bytes)"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "я".repeat(400); // 2 bytes each
        let kept = ApiError::truncate_body(&body);
        assert!(kept.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_is_unauthorized() {
        assert!(ApiError::from_status(StatusCode::UNAUTHORIZED, "").is_unauthorized());
        assert!(ApiError::SessionExpired.is_unauthorized());
        assert!(!ApiError::InvalidCredentials.is_unauthorized());
        assert!(!ApiError::from_status(StatusCode::FORBIDDEN, "").is_unauthorized());
    }

    #[test]
    fn test_validation_display_lists_fields() {
        let err = ApiError::Validation(vec![
            FieldError::new("email", "email is required"),
            FieldError::new("fullName", "fullName is required"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: email: email is required, fullName: fullName is required"
        );
        assert_eq!(err.field_errors().len(), 2);
    }
}
