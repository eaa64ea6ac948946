//! Job-scoped workbench for Ren'Py game files.
//!
//! Clients upload files (zips are expanded) into an isolated job workspace,
//! run external decompile, extract and pack tools over it, then browse,
//! edit, rearrange and download the results over HTTP. Workspaces are swept
//! once idle past their time-to-live.
//!
//! The sandboxing, job store and expiry live in the `job-sandbox` crate; this
//! crate adds ingestion, processing, file operations and the HTTP surface.

pub mod config;
pub mod errors;
pub mod ingest;
pub mod processing;
pub mod services;
pub mod web;
