//! Error types for the proxy.
//!
//! Every failure that can reach a caller is one variant of [`ProxyError`];
//! translation to an HTTP status and a stable client-visible error type is a
//! total function. Backend error codes get their own mapping table so an
//! unrecognized code still resolves to something sensible.

use crate::translate::openai_types::ErrorResponse;
use thiserror::Error;

/// Error code classification reported by the backend service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    Validation,
    AccessDenied,
    Throttling,
    ModelNotReady,
    Internal,
    QuotaExceeded,
    Unmapped,
}

impl BackendErrorCode {
    /// Classify the error type name the backend reports (for example from the
    /// `x-amzn-errortype` header).
    pub fn from_type_name(name: &str) -> Self {
        // Header values can carry a trailing ":http://..." qualifier
        let name = name.split(':').next().unwrap_or(name);
        match name {
            "ValidationException" => BackendErrorCode::Validation,
            "AccessDeniedException" => BackendErrorCode::AccessDenied,
            "ThrottlingException" => BackendErrorCode::Throttling,
            "ModelNotReadyException" => BackendErrorCode::ModelNotReady,
            "InternalServerException" => BackendErrorCode::Internal,
            "ServiceQuotaExceededException" => BackendErrorCode::QuotaExceeded,
            _ => BackendErrorCode::Unmapped,
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    RateLimit(String),

    #[error("{0}")]
    Model(String),

    #[error("{0}")]
    Server(String),

    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map a backend error code plus its message into the client taxonomy.
    pub fn from_backend(code: BackendErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            BackendErrorCode::Validation => Self::Validation(message),
            BackendErrorCode::AccessDenied => Self::Authentication(message),
            BackendErrorCode::Throttling | BackendErrorCode::QuotaExceeded => {
                Self::RateLimit(message)
            }
            BackendErrorCode::ModelNotReady => Self::Model(message),
            BackendErrorCode::Internal | BackendErrorCode::Unmapped => Self::Server(message),
        }
    }

    /// HTTP status for the client response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Authentication(_) => 401,
            Self::Authorization(_) => 403,
            Self::Timeout(_) => 408,
            Self::RateLimit(_) => 429,
            Self::Server(_) => 500,
            Self::Model(_) | Self::Connection(_) => 503,
            Self::Internal(_) | Self::Config(_) => 500,
        }
    }

    /// Stable machine-readable error type string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::Authentication(_) => "authentication_error",
            Self::Authorization(_) => "authorization_error",
            Self::RateLimit(_) => "rate_limit_error",
            Self::Model(_) => "model_error",
            Self::Server(_) => "server_error",
            Self::Connection(_) => "connection_error",
            Self::Timeout(_) => "timeout_error",
            Self::Internal(_) | Self::Config(_) => "internal_error",
        }
    }

    /// Build the client-visible error body. Internal faults never echo their
    /// details to the caller; those stay in the server-side log.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            Self::Internal(_) | Self::Config(_) => "Internal server error".to_string(),
            Self::Timeout(_) => "Request timeout".to_string(),
            Self::Connection(_) => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        };
        ErrorResponse::new(self.status_code(), self.error_type(), message)
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Connection(format!("Backend request failed: {err}"))
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
