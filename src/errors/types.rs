//! Error type definitions for the workbench service.

use job_sandbox::SandboxError;
use std::path::Path;
use thiserror::Error;

/// Top-level application error type
///
/// Each variant is a distinct failure kind that the web layer maps to one
/// status code. External tool failures are deliberately absent: they are
/// recorded in the processing log, never raised.
#[derive(Error, Debug)]
pub enum AppError {
    /// Client path failed syntactic validation
    #[error("Invalid path: {path:?} - {reason}")]
    InvalidPath { path: String, reason: String },

    /// Client path resolved outside its sandbox root
    #[error("Path escapes sandbox: {path:?}")]
    PathEscape { path: String },

    /// Unknown or malformed job id
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Entry inside a job side does not exist
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Upload, extraction or text content over its cap
    #[error("Payload too large: {what} exceeds {limit_bytes} bytes")]
    PayloadTooLarge { what: String, limit_bytes: u64 },

    /// Move destination exists and overwrite was not requested
    #[error("Destination already exists: {path}")]
    Conflict { path: String },

    /// Directory moved into itself
    #[error("Invalid move: {src} -> {dst}")]
    InvalidMove { src: String, dst: String },

    /// Zip entry that would land outside its destination
    #[error("Unsafe archive entry: {entry:?}")]
    UnsafeArchiveEntry { entry: String },

    /// Packer key that is not a hexadecimal integer
    #[error("Invalid key: {key:?}")]
    InvalidKey { key: String },

    /// Pack source has nothing in it
    #[error("Nothing to pack in {path:?}")]
    EmptySource { path: String },

    /// Other request validation failures
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip reading or writing errors
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn invalid_path<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn file_not_found<P: Into<String>>(path: P) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn payload_too_large<W: Into<String>>(what: W, limit_bytes: u64) -> Self {
        Self::PayloadTooLarge {
            what: what.into(),
            limit_bytes,
        }
    }

    pub fn unsafe_entry<E: Into<String>>(entry: E) -> Self {
        Self::UnsafeArchiveEntry {
            entry: entry.into(),
        }
    }

    /// Short machine-readable kind, used in error responses and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "invalid_path",
            Self::PathEscape { .. } => "path_escape",
            Self::JobNotFound { .. } => "job_not_found",
            Self::FileNotFound { .. } => "file_not_found",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Conflict { .. } => "conflict",
            Self::InvalidMove { .. } => "invalid_move",
            Self::UnsafeArchiveEntry { .. } => "unsafe_archive_entry",
            Self::InvalidKey { .. } => "invalid_key",
            Self::EmptySource { .. } => "empty_source",
            Self::Validation { .. } => "validation",
            Self::Io(_) => "io",
            Self::Archive(_) => "archive",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<SandboxError> for AppError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::InvalidPath { path, reason } => Self::InvalidPath { path, reason },
            SandboxError::PathEscape { path, .. } => Self::PathEscape { path },
            SandboxError::JobNotFound { id } => Self::JobNotFound { id },
            SandboxError::FileNotFound { path } => Self::FileNotFound { path },
            SandboxError::Io(e) => Self::Io(e),
            SandboxError::DirectoryCreation { path, source } => {
                Self::Io(std::io::Error::new(source.kind(), describe(&path, &source)))
            }
            SandboxError::Permission { operation, path } => Self::Internal {
                message: format!("Permission denied: {operation} on {}", path.display()),
            },
            SandboxError::Configuration { message } => Self::Configuration { message },
        }
    }
}

fn describe(path: &Path, source: &std::io::Error) -> String {
    format!("failed to create {}: {source}", path.display())
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal {
            message: format!("Background task failed: {err}"),
        }
    }
}
