// crates/backend-lib/src/error.rs

//! Central error type for the realtime core.
use chatwire_common::DecodeError;
use thiserror::Error;

use crate::storage::{StoreError, StoreErrorKind};
use crate::validation::ValidationError;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed JSON, unknown frame type or missing field
    #[error("{0}")]
    BadFrame(String),

    /// Not a group member, or acting on another user's message
    #[error("{0}")]
    Unauthorized(String),

    /// A block pair forbids the interaction
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Media is not approved")]
    MediaNotApproved,

    #[error("Storage error: {0}")]
    Persistence(#[from] StoreError),

    /// Socket read/write failure; never reported to the peer
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::BadFrame(_) => "FRAME_001",
            AppError::Unauthorized(_) => "AUTHZ_001",
            AppError::Forbidden(_) => "AUTHZ_002",
            AppError::NotFound(_) => "NF_001",
            AppError::MediaNotApproved => "MEDIA_001",
            AppError::Persistence(e) => match e.kind() {
                StoreErrorKind::NotFound => "STORE_001",
                StoreErrorKind::Conflict => "STORE_002",
                StoreErrorKind::Invariant => "STORE_003",
                StoreErrorKind::Backend => "STORE_004",
            },
            AppError::Transport(_) => "WS_001",
            AppError::Config(_) => "CFG_001",
        }
    }

    /// Text for the peer-visible `error` frame. Storage detail stays in the
    /// server log.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Persistence(_) | AppError::Transport(_) | AppError::Config(_) => {
                "Internal server error".to_string()
            },
            other => other.to_string(),
        }
    }

    /// Whether the session's pumps must stop
    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Transport(_))
    }

    /// Map a missing record to the peer-facing `NotFound`, keeping other
    /// storage failures as persistence errors.
    pub fn from_lookup(err: StoreError, what: &str) -> Self {
        if err.is_not_found() {
            AppError::NotFound(format!("{what} not found"))
        } else {
            AppError::Persistence(err)
        }
    }
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        AppError::BadFrame(err.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::BadFrame(err.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
