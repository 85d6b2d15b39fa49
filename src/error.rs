// src/error.rs

use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

/// Everything that can go wrong while moving data values between instances.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("authentication rejected with HTTP {status}")]
    Auth { status: StatusCode },

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid JSON response: {snippet}")]
    Decode { snippet: String },

    #[error("could not serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled by user")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Plain discriminant of [`SyncError`], handed to event sinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    HttpStatus,
    Auth,
    Network,
    Decode,
    Serialization,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Decode => "decode",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::HttpStatus { .. } => ErrorKind::HttpStatus,
            SyncError::Auth { .. } => ErrorKind::Auth,
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::Decode { .. } => ErrorKind::Decode,
            SyncError::Serialization(_) => ErrorKind::Serialization,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Config(_) => ErrorKind::Config,
        }
    }

    /// Worth another attempt: transport failures and server-side (5xx) errors.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::HttpStatus { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// Map a non-success response to the matching variant.
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            SyncError::Auth { status }
        } else {
            SyncError::HttpStatus {
                status,
                body: snippet(body, 200),
            }
        }
    }
}

/// First `max` characters of `body`, for diagnostics.
pub(crate) fn snippet(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
