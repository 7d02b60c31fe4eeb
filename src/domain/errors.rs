use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform-wide error kinds. Transport maps these to HTTP statuses at the
/// edge; nothing below the server layer inspects error strings.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum PlatformError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance for {token}: need {needed}, available {available}")]
    InsufficientBalance {
        token: String,
        needed: u64,
        available: u64,
    },

    #[error("Insufficient liquidity in pool {0}")]
    InsufficientLiquidity(String),

    #[error("Swap output would be zero")]
    ZeroOutput,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Blocked by safety gate: {0}")]
    SafetyBlocked(String),

    #[error("Venue error {status}: {body}")]
    VenueError { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Conflict: {0} already taken")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    BadInput(String),

    #[error("Cryptographic operation failed")]
    Cryptographic,

    #[error("Store error: {0}")]
    Store(String),
}

impl PlatformError {
    /// Whether the caller can retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited | PlatformError::Timeout | PlatformError::VenueError { .. }
        )
    }
}

impl From<sqlx::Error> for PlatformError {
    fn from(e: sqlx::Error) -> Self {
        PlatformError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PlatformError::Timeout
        } else {
            PlatformError::VenueError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                body: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PlatformError::NotFound("pool CRWN-USDT".to_string());
        assert_eq!(e.to_string(), "Not found: pool CRWN-USDT");

        let e = PlatformError::SafetyBlocked("daily cap reached".to_string());
        assert_eq!(e.to_string(), "Blocked by safety gate: daily cap reached");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PlatformError::RateLimited.is_retryable());
        assert!(PlatformError::Timeout.is_retryable());
        assert!(!PlatformError::AuthRequired.is_retryable());
        assert!(!PlatformError::ZeroOutput.is_retryable());
    }

    #[test]
    fn test_insufficient_balance_message() {
        let e = PlatformError::InsufficientBalance {
            token: "CRWN".to_string(),
            needed: 100,
            available: 40,
        };
        assert!(e.to_string().contains("CRWN"));
        assert!(e.to_string().contains("100"));
    }
}
