//! Protocol client error types

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the group protocol client.
///
/// This is a closed enumeration: the retry policy and the invitation engine
/// match on it explicitly, so every backend must map its failures into one of
/// these kinds.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("User disallows being added to groups")]
    PrivacyRestricted,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Check if this is a rate limit signal
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ClientError::RateLimited { .. })
    }

    /// Check if this error may heal on retry.
    ///
    /// Rate limits are handled separately (they always retry, with the
    /// remote-suggested wait); this covers the budgeted transient class.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::RateLimited { .. } => true,
            ClientError::Api { code, .. } => *code >= 500,
            ClientError::Network(_) => true,
            ClientError::Timeout(_) => true,
            ClientError::PrivacyRestricted => false,
            ClientError::NotFound(_) => false,
        }
    }

    /// Get the suggested wait if this is a rate limit signal
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_rate_limit() {
        let err = ClientError::RateLimited {
            retry_after: Duration::from_secs(60),
        };
        assert!(err.is_rate_limit());

        let err = ClientError::Api {
            code: 500,
            message: "Server error".to_string(),
        };
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_is_retryable() {
        assert!(
            ClientError::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .is_retryable()
        );

        // Server-side errors should be retryable
        assert!(
            ClientError::Api {
                code: 502,
                message: "Bad gateway".to_string()
            }
            .is_retryable()
        );

        // Client-side API errors should not be retryable
        assert!(
            !ClientError::Api {
                code: 400,
                message: "Bad request".to_string()
            }
            .is_retryable()
        );

        assert!(ClientError::Network("reset".to_string()).is_retryable());
        assert!(ClientError::Timeout(Duration::from_secs(30)).is_retryable());

        // Permanent per-user conditions must never be retried
        assert!(!ClientError::PrivacyRestricted.is_retryable());
        assert!(!ClientError::NotFound("ghost".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = ClientError::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));

        let err = ClientError::Network("down".to_string());
        assert_eq!(err.retry_after(), None);
    }
}
