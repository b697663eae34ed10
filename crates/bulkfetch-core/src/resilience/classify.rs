//! Classify HTTP status and curl errors into retry policy error kinds.

use std::time::Duration;

use super::error::FetchError;

/// High-level classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// Service asked us to slow down; handled pool-wide, not per call.
    RateLimited(Option<Duration>),
    /// Retryable server-side HTTP status (5xx other than 503).
    Http5xx(u16),
    /// Resource is gone; never retried.
    NotFound,
    /// Everything else: terminal on first attempt.
    Fatal,
}

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(status: u32) -> ErrorKind {
    match status {
        429 | 503 => ErrorKind::RateLimited(None),
        404 | 410 => ErrorKind::NotFound,
        500..=599 => ErrorKind::Http5xx(status as u16),
        _ => ErrorKind::Fatal,
    }
}

/// Classify a curl transport error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Fatal
}

/// Classify an outbound-call error into an ErrorKind.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Curl(ce) => classify_curl_error(ce),
        FetchError::Http { status } => classify_http_status(*status),
        FetchError::RateLimited { retry_after } => ErrorKind::RateLimited(*retry_after),
        FetchError::NotFound { .. } => ErrorKind::NotFound,
        FetchError::CircuitOpen { .. }
        | FetchError::Decode(_)
        | FetchError::Storage(_)
        | FetchError::Internal(_) => ErrorKind::Fatal,
    }
}
