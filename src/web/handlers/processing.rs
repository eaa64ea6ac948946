//! Processing and repack handlers

use axum::{
    extract::{Path, State},
    response::Response,
};
use job_sandbox::TreeNode;
use serde::Serialize;

use crate::errors::AppError;
use crate::processing::{PackRequest, ProcessOutcome, ProcessingLog};
use crate::web::{
    AppState,
    extractors::{ApiJson, ApiQuery, ProcessQuery},
    responses::ok,
};

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub job_id: String,
    pub mode: String,
    pub output_tree: TreeNode,
    pub logs: ProcessingLog,
}

impl ProcessResponse {
    fn new(job_id: String, mode: String, outcome: ProcessOutcome) -> Self {
        Self {
            job_id,
            mode,
            output_tree: outcome.output_tree,
            logs: outcome.logs,
        }
    }
}

/// `POST /api/jobs/{id}/process?mode=`
///
/// Tool failures come back in `logs`; only request problems are errors.
pub async fn process_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<ProcessQuery>,
) -> Result<Response, AppError> {
    let mode = query.mode.to_string();
    let request = query.into_request();
    let outcome = state.service.process(&id, &request).await?;
    Ok(ok(ProcessResponse::new(id, mode, outcome)))
}

/// `POST /api/jobs/{id}/repack`
pub async fn repack_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<PackRequest>,
) -> Result<Response, AppError> {
    let outcome = state.service.repack(&id, &request).await?;
    Ok(ok(ProcessResponse::new(id, "repack".to_string(), outcome)))
}
