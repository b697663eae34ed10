//! Outbound-call error type, shared by the backend and the resilience layer.

use std::time::Duration;

use thiserror::Error;

use crate::task::FailureKind;

/// Error from a single outbound operation (locator resolution or payload
/// fetch). Carries enough structure for the retry policy and the breaker to
/// branch on kind without string inspection.
#[derive(Debug, Error)]
pub enum FetchError {
    /// curl reported a transport-level error (timeout, connection, TLS).
    #[error("{0}")]
    Curl(#[from] curl::Error),

    /// Non-2xx HTTP status that is not one of the dedicated cases below.
    #[error("HTTP {status}")]
    Http { status: u32 },

    /// The service asked us to slow down (429/503), optionally with a
    /// Retry-After hint. Pauses the whole pool, not just this call.
    #[error("rate limited by service")]
    RateLimited { retry_after: Option<Duration> },

    /// The remote resource does not exist. Terminal on first attempt.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The circuit for this operation is open; the call never reached the
    /// network.
    #[error("circuit open for operation '{operation}'")]
    CircuitOpen { operation: String },

    /// Response body was not the expected shape.
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    /// Payload could not be persisted.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),

    /// Runtime-level failure (e.g. a blocking worker could not be joined).
    #[error("internal: {0}")]
    Internal(String),
}

impl FetchError {
    /// Terminal classification for the final report.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::Curl(_) | FetchError::Http { .. } => FailureKind::Transient,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::NotFound { .. } => FailureKind::NotFound,
            FetchError::CircuitOpen { .. } => FailureKind::Deferred,
            FetchError::Decode(_) => FailureKind::Decode,
            FetchError::Storage(_) => FailureKind::Storage,
            FetchError::Internal(_) => FailureKind::Transient,
        }
    }
}
