use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Run {run_id} did not finish within {max_secs}s")]
    WaitDeadline { run_id: String, max_secs: u64 },
}

impl ApifyError {
    /// HTTP status of the upstream response, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApifyError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry executor may re-attempt the failed call.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApifyError::Network(_) => true,
            ApifyError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            ApifyError::Parse(_) | ApifyError::WaitDeadline { .. } => false,
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        ApifyError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        ApifyError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = ApifyError::Api {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), Some(503));
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = ApifyError::Api {
            status: 404,
            message: "no such run".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn deadline_is_not_retryable() {
        let err = ApifyError::WaitDeadline {
            run_id: "r1".into(),
            max_secs: 60,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), None);
    }
}
