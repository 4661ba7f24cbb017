// =============================================================================
// Classified Service Errors — the single error currency of the backend
// =============================================================================
//
// Every failure that can cross the API boundary is a `ServiceError` carrying
// an HTTP status, a machine-readable code, a human-readable message, and a
// `retryable` flag. The Upbit client is the only layer that *classifies*
// upstream failures; everything above it propagates the classified error
// unchanged. Raw upstream error text never reaches a client.
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

// -----------------------------------------------------------------------------
// Error kinds
// -----------------------------------------------------------------------------

/// Failure taxonomy. The kind alone determines the HTTP status, the wire
/// `code` string, and whether the caller may usefully retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network-level failure talking to the upstream exchange.
    Transport,
    /// Upstream answered 429 or 5xx, or all retries were exhausted.
    UpstreamOverload,
    /// Upstream rejected our request with a non-429 4xx.
    UpstreamRejected,
    /// The circuit breaker is open for the target endpoint.
    CircuitOpen,
    /// Upstream returned a 2xx body we could not make sense of.
    MalformedUpstream,
    /// The caller's request failed validation.
    InvalidInput,
    /// The caller exceeded the per-client request budget.
    RateLimited,
    /// Anything unexpected. Logged with full detail, surfaced generically.
    Internal,
}

impl ErrorKind {
    /// Machine-readable code sent in the error envelope.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Transport => "UPSTREAM_TRANSPORT",
            ErrorKind::UpstreamOverload => "UPSTREAM_OVERLOADED",
            ErrorKind::UpstreamRejected => "UPSTREAM_REJECTED",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::MalformedUpstream => "UPSTREAM_MALFORMED",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// HTTP status surfaced to the caller.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Transport
            | ErrorKind::UpstreamOverload
            | ErrorKind::UpstreamRejected
            | ErrorKind::MalformedUpstream => StatusCode::BAD_GATEWAY,
            ErrorKind::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a client retry (possibly after a delay) can succeed.
    pub fn retryable(self) -> bool {
        match self {
            ErrorKind::Transport
            | ErrorKind::UpstreamOverload
            | ErrorKind::CircuitOpen
            | ErrorKind::MalformedUpstream
            | ErrorKind::Internal => true,
            ErrorKind::UpstreamRejected | ErrorKind::InvalidInput | ErrorKind::RateLimited => {
                false
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ServiceError
// -----------------------------------------------------------------------------

/// A fully classified failure, ready to be rendered as an error envelope.
#[derive(Debug, Clone)]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    /// Suggested delay before retrying, in seconds (rate-limit rejections).
    pub retry_after_secs: Option<u64>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn upstream_overload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamOverload, message)
    }

    pub fn upstream_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamRejected, message)
    }

    pub fn circuit_open(endpoint: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("upstream endpoint {endpoint} is temporarily unavailable"),
        )
    }

    pub fn malformed_upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedUpstream, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: format!("too many requests; retry in {retry_after_secs}s"),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for ServiceError {}

// -----------------------------------------------------------------------------
// Wire envelope
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    retryable: bool,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        // Internal errors get full detail in the log and a generic message on
        // the wire.
        let message = if self.kind == ErrorKind::Internal {
            error!(detail = %self.message, "internal error");
            "internal error".to_string()
        } else {
            self.message
        };

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.kind.code(),
                message,
                retryable: self.kind.retryable(),
            },
        };

        let mut response = (self.kind.status(), Json(envelope)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(val) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}
