use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Every way image acquisition or task orchestration can fail.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid image reference: {message}")]
    InvalidReference { message: String },

    #[error("unsupported inline encoding: {message}")]
    UnsupportedEncoding { message: String },

    #[error("invalid media type '{media_type}': expected image/*")]
    InvalidMediaType { media_type: String },

    #[error("image exceeds {limit} bytes ({observed})")]
    TooLarge { limit: u64, observed: String },

    #[error("unsupported URL scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },

    #[error("host '{host}' is blocked by the private network policy")]
    BlockedBySsrfPolicy { host: String },

    #[error("upstream request failed ({status}): {body}")]
    UpstreamError { status: u16, body: String },

    #[error("{operation} timed out after {}ms", .budget.as_millis())]
    Timeout { operation: String, budget: Duration },

    #[error("image edit requires at least one reference image")]
    MissingReferenceImage,

    #[error(
        "task {task_id} failed upstream after {attempts} attempt(s) in {}ms: {detail}",
        .elapsed.as_millis()
    )]
    UpstreamTaskFailed {
        task_id: String,
        attempts: u32,
        elapsed: Duration,
        detail: String,
    },

    #[error(
        "task {task_id} still unfinished after {attempts} poll attempt(s) ({}ms)",
        .elapsed.as_millis()
    )]
    PollTimeout {
        task_id: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("malformed upstream response: {message}")]
    MalformedResponse { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidReference,
    UnsupportedEncoding,
    InvalidMediaType,
    TooLarge,
    UnsupportedScheme,
    BlockedBySsrfPolicy,
    UpstreamError,
    Timeout,
    MissingReferenceImage,
    UpstreamTaskFailed,
    PollTimeout,
    MalformedResponse,
    Network,
    InvalidRequest,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidReference => "invalid_reference",
            Self::UnsupportedEncoding => "unsupported_encoding",
            Self::InvalidMediaType => "invalid_media_type",
            Self::TooLarge => "too_large",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::BlockedBySsrfPolicy => "blocked_by_ssrf_policy",
            Self::UpstreamError => "upstream_error",
            Self::Timeout => "timeout",
            Self::MissingReferenceImage => "missing_reference_image",
            Self::UpstreamTaskFailed => "upstream_task_failed",
            Self::PollTimeout => "poll_timeout",
            Self::MalformedResponse => "malformed_response",
            Self::Network => "network_error",
            Self::InvalidRequest => "invalid_request",
        }
    }

    /// Status the caller-facing HTTP layer answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidReference
            | Self::UnsupportedEncoding
            | Self::InvalidMediaType
            | Self::UnsupportedScheme
            | Self::MissingReferenceImage
            | Self::InvalidRequest => 400,
            Self::BlockedBySsrfPolicy => 403,
            Self::TooLarge => 413,
            Self::UpstreamError
            | Self::UpstreamTaskFailed
            | Self::MalformedResponse
            | Self::Network => 502,
            Self::Timeout | Self::PollTimeout => 504,
        }
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidReference { .. } => ErrorKind::InvalidReference,
            Self::UnsupportedEncoding { .. } => ErrorKind::UnsupportedEncoding,
            Self::InvalidMediaType { .. } => ErrorKind::InvalidMediaType,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::UnsupportedScheme { .. } => ErrorKind::UnsupportedScheme,
            Self::BlockedBySsrfPolicy { .. } => ErrorKind::BlockedBySsrfPolicy,
            Self::UpstreamError { .. } => ErrorKind::UpstreamError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MissingReferenceImage => ErrorKind::MissingReferenceImage,
            Self::UpstreamTaskFailed { .. } => ErrorKind::UpstreamTaskFailed,
            Self::PollTimeout { .. } => ErrorKind::PollTimeout,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Network { .. } => ErrorKind::Network,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
        }
    }

    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::InvalidReference {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, budget: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            budget,
        }
    }

    pub fn too_large(limit: u64, observed: impl Into<String>) -> Self {
        Self::TooLarge {
            limit,
            observed: observed.into(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}
