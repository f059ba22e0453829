//! Error types for the scrape core
//!
//! Provides the error taxonomy shared by the executor, the queues and the
//! scraper, plus the HTTP mapping handlers use to render failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

// == Error Kind ==
/// Classification of a failure, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded,
    #[serde(rename = "SCRAPING_ERROR")]
    UpstreamFetch,
    #[serde(rename = "SERVER_ERROR")]
    Internal,
    #[serde(rename = "SERVICE_UNAVAILABLE")]
    ServiceUnavailable,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
}

impl ErrorKind {
    /// Wire code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::UpstreamFetch => "SCRAPING_ERROR",
            ErrorKind::Internal => "SERVER_ERROR",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Validation => "VALIDATION_ERROR",
        }
    }

    /// HTTP status a handler should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamFetch => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// False for NotFound, InvalidRequest and Validation; every other kind
    /// is treated as transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::NotFound | ErrorKind::InvalidRequest | ErrorKind::Validation
        )
    }
}

// == Api Error Enum ==
/// Unified error type for the scrape core.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Caller sent a malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream has no such resource
    #[error("{0} not found")]
    NotFound(String),

    /// Too many requests, either ours or the upstream's limit
    #[error("Too many requests, please try again later")]
    RateLimitExceeded,

    /// Upstream fetch failed (connection reset, refused, bad status)
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Upstream or a local component refused service
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Input failed validation
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl ApiError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::RateLimitExceeded => ErrorKind::RateLimitExceeded,
            ApiError::UpstreamFetch(_) => ErrorKind::UpstreamFetch,
            ApiError::Internal(_) => ErrorKind::Internal,
            ApiError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

// == Conversions ==
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::UpstreamFetch(err.to_string())
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::TimedOut => ApiError::Timeout(err.to_string()),
            Io::ConnectionReset
            | Io::ConnectionRefused
            | Io::ConnectionAborted
            | Io::BrokenPipe
            | Io::UnexpectedEof => ApiError::UpstreamFetch(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("JSON error: {}", err))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = Json(json!({
            "success": false,
            "error": {
                "code": kind.code(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (kind.status_code(), body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the scrape core.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (ApiError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
            (ApiError::Validation("slug".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("Anime".into()), StatusCode::NOT_FOUND),
            (ApiError::RateLimitExceeded, StatusCode::TOO_MANY_REQUESTS),
            (ApiError::UpstreamFetch("reset".into()), StatusCode::BAD_GATEWAY),
            (ApiError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::ServiceUnavailable("403".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ApiError::Timeout("10s".into()), StatusCode::GATEWAY_TIMEOUT),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{:?}", error);
        }
    }

    #[test]
    fn test_retryability() {
        assert!(!ApiError::NotFound("x".into()).is_retryable());
        assert!(!ApiError::InvalidRequest("x".into()).is_retryable());
        assert!(!ApiError::Validation("x".into()).is_retryable());

        assert!(ApiError::UpstreamFetch("ECONNRESET".into()).is_retryable());
        assert!(ApiError::Timeout("x".into()).is_retryable());
        assert!(ApiError::ServiceUnavailable("x".into()).is_retryable());
        assert!(ApiError::RateLimitExceeded.is_retryable());
        assert!(ApiError::Internal("x".into()).is_retryable());
    }

    #[test]
    fn test_io_errors_are_classified() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "ECONNRESET");
        assert_eq!(ApiError::from(reset).kind(), ErrorKind::UpstreamFetch);

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "ECONNREFUSED");
        assert_eq!(ApiError::from(refused).kind(), ErrorKind::UpstreamFetch);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "ETIMEDOUT");
        assert_eq!(ApiError::from(timed_out).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_not_found_message() {
        let error = ApiError::NotFound("Anime".into());
        assert_eq!(error.to_string(), "Anime not found");
    }

    #[tokio::test]
    async fn test_error_body_format() {
        let response = ApiError::Timeout("Request timeout".into()).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "TIMEOUT");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Request timeout"));
        assert!(json["error"]["timestamp"].is_string());
    }
}
