#![forbid(unsafe_code)]
//! Error types for ORFS.
//!
//! Defines `OrfsError` and a `Result<T>` alias used throughout the workspace.

use thiserror::Error;

/// Unified error type for all ORFS operations.
#[derive(Debug, Error)]
pub enum OrfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such file or directory: {0}")]
    NotExist(String),

    #[error("file exists: {0}")]
    Exist(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("metadata entry empty")]
    MdEmpty,

    #[error("metadata entry too short: {len} bytes")]
    MdTooShort { len: usize },

    #[error("metadata entry invalid: {0}")]
    MdInvalid(String),

    #[error("object not found in store: {0}")]
    NotFoundInStore(String),

    #[error("exclusive lock denied on {oid}")]
    LockDenied { oid: String },

    #[error("weird status {status:#04x} in metadata entry")]
    WeirdStatus { status: u8 },
}

impl OrfsError {
    /// Whether this is the store's "not found" sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFoundInStore(_))
    }

    /// Map store-level "not found" to the filesystem-level "not exist"
    /// for the given path; all other errors pass through unchanged.
    #[must_use]
    pub fn at_path(self, path: &str) -> Self {
        match self {
            Self::NotFoundInStore(_) => Self::NotExist(path.to_owned()),
            other => other,
        }
    }
}

/// Result alias using `OrfsError`.
pub type Result<T> = std::result::Result<T, OrfsError>;
