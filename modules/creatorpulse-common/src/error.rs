use serde::Serialize;
use thiserror::Error;

/// Error taxonomy surfaced at the gateway boundary. Codes are stable and
/// machine-readable; anything that is not already one of these is converted
/// to `Internal` before it crosses the HTTP surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid or expired API key")]
    InvalidApiKey,

    #[error("missing permission: {0}")]
    Forbidden(String),

    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("no handler registered for platform: {0}")]
    HandlerNotFound(String),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("platform error (status {status}): {message}")]
    Platform { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidApiKey => "INVALID_API_KEY",
            GatewayError::Forbidden(_) => "FORBIDDEN",
            GatewayError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            GatewayError::HandlerNotFound(_) => "HANDLER_NOT_FOUND",
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
            GatewayError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            GatewayError::Timeout(_) => "TIMEOUT",
            GatewayError::Platform { .. } => "PLATFORM_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this error maps to. Platform errors pass their status
    /// through untouched.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::InvalidApiKey => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::RouteNotFound { .. } => 404,
            GatewayError::HandlerNotFound(_) => 500,
            GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::CircuitBreakerOpen(_) => 503,
            GatewayError::ServiceUnavailable { .. } => 503,
            GatewayError::Timeout(_) => 408,
            GatewayError::Platform { status, .. } => *status,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Seconds the caller should wait before retrying, when a wait is known.
    /// Set on 429 and on 503 with a server-provided hint.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            GatewayError::ServiceUnavailable {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Whether the retry executor may re-attempt the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::RateLimitExceeded { .. }
            | GatewayError::ServiceUnavailable { .. }
            | GatewayError::Timeout(_) => true,
            GatewayError::Platform { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    /// Fold any error into the taxonomy. Taxonomy errors pass through.
    pub fn from_any(err: anyhow::Error) -> Self {
        match err.downcast::<GatewayError>() {
            Ok(e) => e,
            Err(other) => GatewayError::Internal(other.to_string()),
        }
    }
}

/// Wire shape of an error response. 4xx carries code + message; 5xx adds
/// the request id so callers can quote it to support.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn from_error(err: &GatewayError, request_id: &str) -> Self {
        let request_id = if err.status() >= 500 {
            Some(request_id.to_string())
        } else {
            None
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            request_id,
            retry_after: err.retry_after_secs(),
        }
    }
}
