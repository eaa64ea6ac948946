//! Error types for job sandboxes.

use std::path::PathBuf;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while resolving paths or managing job workspaces.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Candidate path is syntactically unsafe (empty, absolute, `..`, bad characters)
    #[error("Invalid path: {path:?} - {reason}")]
    InvalidPath { path: String, reason: String },

    /// Candidate path resolved outside of its sandbox root
    #[error("Path escapes sandbox: {path:?} resolves to {resolved:?} (outside {root:?})")]
    PathEscape {
        path: String,
        resolved: PathBuf,
        root: PathBuf,
    },

    /// Job identifier is malformed or its workspace does not exist
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Entry inside a job workspace does not exist
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Directory creation failed
    #[error("Failed to create directory: {path:?} - {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Permissions error
    #[error("Permission denied: {operation} on {path:?}")]
    Permission { operation: String, path: PathBuf },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SandboxError {
    pub(crate) fn invalid_path<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
