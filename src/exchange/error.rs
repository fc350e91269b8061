//! Typed failures of broker gateway calls.

use thiserror::Error;

/// Broker message returned once an order hits the exchange modification cap.
pub const MODIFICATION_LIMIT_MESSAGE: &str = "Maximum allowed order modifications exceeded";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("service unavailable: {status_code}")]
    ServiceUnavailable { status_code: u16 },

    #[error("rate limited")]
    RateLimited,

    /// The broker refused the request; never retried.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("order {order_id} exceeded the modification limit")]
    ModificationLimitExceeded { order_id: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("http error: {status_code} - {message}")]
    Http { status_code: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn modification_limit(order_id: impl Into<String>) -> Self {
        Self::ModificationLimitExceeded {
            order_id: order_id.into(),
        }
    }

    /// Map a non-success HTTP response to an error.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            429 => Self::RateLimited,
            502..=504 => Self::ServiceUnavailable { status_code },
            404 => Self::NotFound(message),
            400..=499 => Self::Rejected(message),
            _ => Self::Http {
                status_code,
                message,
            },
        }
    }

    /// Whether a single retry after a short delay may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ServiceUnavailable { .. } | Self::RateLimited
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Http {
                status_code: 0,
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(GatewayError::from_status(503, "down").is_transient());
        assert!(GatewayError::from_status(429, "slow down").is_transient());
        assert!(matches!(
            GatewayError::from_status(400, "bad price"),
            GatewayError::Rejected(_)
        ));
        assert!(!GatewayError::from_status(500, "boom").is_transient());
    }

    #[test]
    fn test_rejection_is_not_transient() {
        assert!(!GatewayError::rejected("insufficient margin").is_transient());
        assert!(!GatewayError::modification_limit("1").is_transient());
        assert!(GatewayError::Timeout("read".to_string()).is_transient());
    }
}
