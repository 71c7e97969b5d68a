use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// Worth retrying: timeouts, connection failures, 429 and 5xx.
    #[error("transient failure{}: {message}", status_suffix(*status))]
    Transient {
        status: Option<u16>,
        message: String,
        /// Server-requested wait, from `Retry-After`.
        retry_after: Option<Duration>,
    },

    /// Not worth retrying: other 4xx, malformed payloads or responses.
    #[error("permanent failure{}: {message}", status_suffix(*status))]
    Permanent { status: Option<u16>, message: String },

    /// The bearer token was rejected (401).
    #[error("access token expired or revoked")]
    AuthExpired,

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl RemoteError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            "empty response body".to_string()
        } else {
            truncate(body.trim(), 200)
        };
        match status {
            401 => Self::AuthExpired,
            408 | 429 | 500..=599 => Self::Transient {
                status: Some(status),
                message,
                retry_after,
            },
            _ => Self::Permanent {
                status: Some(status),
                message,
            },
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::transient(status, e.to_string())
        } else {
            Self::permanent(status, e.to_string())
        }
    }
}

/// A remote call that gave up, with the retry history it accumulated.
#[derive(Debug, Clone, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct CallFailure {
    #[source]
    pub error: RemoteError,
    pub attempts: u32,
    pub delays: Vec<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(RemoteError::from_status(401, None, ""), RemoteError::AuthExpired);
        assert!(RemoteError::from_status(429, None, "slow down").is_retryable());
        assert!(RemoteError::from_status(503, None, "").is_retryable());
        assert!(RemoteError::from_status(408, None, "").is_retryable());
        assert!(!RemoteError::from_status(400, None, "bad").is_retryable());
        assert!(!RemoteError::from_status(404, None, "").is_retryable());
        assert!(!RemoteError::from_status(409, None, "").is_retryable());
    }

    #[test]
    fn retry_after_only_on_transient() {
        let e = RemoteError::from_status(429, Some(Duration::from_secs(3)), "");
        assert_eq!(e.retry_after(), Some(Duration::from_secs(3)));
        let e = RemoteError::from_status(400, Some(Duration::from_secs(3)), "");
        assert_eq!(e.retry_after(), None);
    }

    #[test]
    fn display_includes_status() {
        let e = RemoteError::permanent(Some(422), "name is required");
        assert_eq!(e.to_string(), "permanent failure (HTTP 422): name is required");
        let e = RemoteError::transient(None, "connection reset");
        assert_eq!(e.to_string(), "transient failure: connection reset");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let RemoteError::Permanent { message, .. } = RemoteError::from_status(400, None, &body) else {
            panic!("expected Permanent")
        };
        assert_eq!(message.chars().count(), 201);
    }
}
