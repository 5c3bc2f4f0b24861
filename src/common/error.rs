//! Error types for the master

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Placement Errors ===
    #[error("No available servers: need {needed}, have {available}")]
    NoAvailableServers { needed: usize, available: usize },

    // === Storage-node Errors ===
    #[error("Downstream call to {node} failed: {reason}")]
    DownstreamFailure { node: String, reason: String },

    // === Network Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message} ({code})")]
    Remote { code: ErrorCode, message: String },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error code carried in RPC error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidRequest,
    NoAvailableServers,
    DownstreamFailure,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::NoAvailableServers => "no_available_servers",
            ErrorCode::DownstreamFailure => "downstream_failure",
            ErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Body of a failed RPC reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::DownstreamFailure { .. } | Error::NoAvailableServers { .. } => true,
            Error::Remote { code, .. } => matches!(
                code,
                ErrorCode::DownstreamFailure | ErrorCode::NoAvailableServers
            ),
            _ => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Error::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Error::NoAvailableServers { .. } => ErrorCode::NoAvailableServers,
            Error::DownstreamFailure { .. } => ErrorCode::DownstreamFailure,
            Error::Remote { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.code() {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists => StatusCode::CONFLICT,
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NoAvailableServers => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DownstreamFailure => StatusCode::BAD_GATEWAY,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorBody {
            code: self.code(),
            message,
        }
    }

    pub fn downstream(node: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Error::DownstreamFailure {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ErrorBody> for Error {
    fn from(body: ErrorBody) -> Self {
        Error::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
