//! Error types for the payment rail adapter.

use thiserror::Error;

/// Failures talking to the rail or waiting for settlement.
#[derive(Debug, Error)]
pub enum RailError {
    /// Credentials were rejected, including after the single refresh-and-retry.
    #[error("payment rail authentication failed: {0}")]
    Auth(String),

    /// Network failure or timeout before a response arrived.
    #[error("payment rail transport error: {0}")]
    Transport(String),

    /// The rail answered with a non-success status.
    #[error("payment rail returned HTTP {status} for {operation}")]
    Status { status: u16, operation: &'static str },

    /// The rail answered but the body did not have the expected shape.
    #[error("unexpected payment rail response: {0}")]
    Decode(String),

    /// The poller ran out of attempts while the payment was still pending.
    #[error("settlement not observed after {attempts} attempts")]
    SettlementTimeout { attempts: u32 },

    /// The rail reported a terminal failure status.
    #[error("payment failed on the rail with status {status}")]
    SettlementFailed { status: String },

    /// The wait was cancelled before a terminal status was seen.
    #[error("settlement wait cancelled")]
    Cancelled,

    /// An identifier would not form a single URL path segment.
    #[error("invalid {kind}: only letters, digits and '-' are allowed")]
    InvalidIdentifier { kind: &'static str },

    /// Missing or unreadable client configuration (certificates, URLs).
    #[error("payment rail configuration error: {0}")]
    Config(String),
}

impl RailError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RailError::Auth(_))
    }
}

impl From<reqwest::Error> for RailError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: query strings may carry identifiers we do not want in logs.
        RailError::Transport(err.without_url().to_string())
    }
}
