//! Error taxonomy for the session pipeline.
//!
//! Fatal classes (identity, verification) terminate the session. History
//! failures never leave the hydrator. Channel errors are logged by the live
//! channel manager and only surface from `start()` when the channel cannot be
//! constructed at all.

use reqwest::StatusCode;
use thiserror::Error;

/// Identity resolution failures. Both are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("host platform not available")]
    HostUnavailable,

    #[error("host user context has no username")]
    IdentityMissing,
}

/// Verification failures. Both are fatal; the split exists for observability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("unauthorized (status {status})")]
    Unauthorized { status: StatusCode },

    #[error("verification transport failed: {message}")]
    Transport { message: String },
}

/// HTTP backend client errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend_base_url_missing")]
    BaseUrlMissing,
    #[error("backend_base_url_invalid:{0}")]
    BaseUrlInvalid(String),
    #[error("backend_client_init_failed:{message}")]
    ClientInit { message: String },
    #[error("backend_invalid_path")]
    InvalidPath,
    #[error("backend_request_failed:{message}")]
    Request { message: String },
    #[error("backend_read_failed:{message}")]
    Read { message: String },
    #[error("backend_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("backend_json_decode_failed:{message}")]
    Decode { message: String },
}

/// Live channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("already open")]
    AlreadyOpen,

    #[error("connection closed")]
    Closed,
}

/// Errors returned by `DispatchSession::start`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session torn down")]
    TornDown,
}

impl SessionError {
    /// Whether the error ended the session through the alert-and-close path.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Identity(_) | Self::Verification(_))
    }
}

/// Errors returned by `DispatchSession::send`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("cannot send an empty message")]
    EmptyMessage,

    #[error("session has no resolved identity")]
    NotReady,

    #[error("session torn down")]
    TornDown,
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid DISPATCH_BASE_URL: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid DISPATCH_REQUEST_TIMEOUT_MS: {0}")]
    InvalidRequestTimeout(String),
    #[error("invalid DISPATCH_CONNECT_TIMEOUT_MS: {0}")]
    InvalidConnectTimeout(String),
    #[error("invalid DISPATCH_RECONNECT_BASE_BACKOFF_MS: {0}")]
    InvalidReconnectBaseBackoff(String),
    #[error("invalid DISPATCH_RECONNECT_MAX_BACKOFF_MS: {0}")]
    InvalidReconnectMaxBackoff(String),
    #[error("invalid DISPATCH_RECONNECT_RANDOMIZATION: {0}")]
    InvalidReconnectRandomization(String),
    #[error("invalid DISPATCH_RECONNECT_MAX_ATTEMPTS: {0}")]
    InvalidReconnectMaxAttempts(String),
}

/// Channel result type.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
