//! Health check HTTP handler

use axum::{extract::State, response::Response};
use serde::Serialize;

use crate::errors::AppError;
use crate::web::{AppState, responses::ok};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub job_count: usize,
    pub job_ttl_secs: u64,
    pub expiry_enabled: bool,
}

/// Liveness plus a summary of the job store
pub async fn health_check(State(state): State<AppState>) -> Result<Response, AppError> {
    let stats = state.service.stats().await?;
    let uptime = chrono::Utc::now() - state.start_time;
    Ok(ok(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime.num_seconds(),
        job_count: stats.job_count,
        job_ttl_secs: stats.ttl_secs,
        expiry_enabled: stats.expiry_enabled,
    }))
}
