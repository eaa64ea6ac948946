//! Centralized error handling for the workbench service
//!
//! The core (ingestion, processing, filesystem operations) returns
//! [`AppError`] values; the web layer maps each kind to a status code in one
//! place (`web::responses::handle_error`).
//!
//! # Error Categories
//!
//! - **Path Errors**: malformed or escaping relative paths
//! - **Resource Errors**: unknown job, missing file
//! - **Request Errors**: size caps, conflicts, invalid moves, bad packer input
//! - **Archive Errors**: unsafe or unreadable zip uploads
//! - **Infrastructure Errors**: I/O, configuration, internal failures

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
