//! Job creation, deletion and tree listing

use axum::{
    extract::{Multipart, Path, State, multipart::MultipartError},
    response::Response,
};
use job_sandbox::{JobSide, TreeNode};
use serde::Serialize;

use crate::errors::{AppError, AppResult};
use crate::services::PendingUpload;
use crate::web::{
    AppState,
    extractors::{ApiQuery, WhereQuery},
    responses::{created, ok},
};

/// Multipart field names accepted as uploads
const UPLOAD_FIELDS: [&str; 2] = ["files", "file"];

#[derive(Debug, Serialize)]
pub struct CreatedJob {
    pub job_id: String,
    pub input_tree: TreeNode,
}

#[derive(Debug, Serialize)]
pub struct TreeResponse {
    pub job_id: String,
    #[serde(rename = "where")]
    pub side: JobSide,
    pub tree: TreeNode,
}

#[derive(Debug, Serialize)]
pub struct DeletedJob {
    pub job_id: String,
    pub deleted: bool,
}

fn multipart_error(err: MultipartError, limit: u64) -> AppError {
    if err.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large("upload", limit)
    } else {
        AppError::validation(format!("Malformed upload: {}", err.body_text()))
    }
}

async fn receive_files(
    upload: &mut PendingUpload,
    multipart: &mut Multipart,
    limit: u64,
) -> AppResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if !field.name().is_some_and(|n| UPLOAD_FIELDS.contains(&n)) {
            continue;
        }
        let declared = field.file_name().map(str::to_string);
        upload.session().ingest(declared.as_deref(), field).await?;
    }
    Ok(())
}

/// `POST /api/jobs`: create a job from one or more uploaded files
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let limit = state.service.ingestor().limits().max_upload_bytes;
    let mut upload = state.service.begin_upload().await?;
    if let Err(e) = receive_files(&mut upload, &mut multipart, limit).await {
        state.service.abandon_upload(upload).await;
        return Err(e);
    }
    let (job_id, input_tree) = state.service.finish_upload(upload).await?;
    Ok(created(CreatedJob { job_id, input_tree }))
}

/// `DELETE /api/jobs/{id}`
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    state.service.delete_job(&id).await?;
    Ok(ok(DeletedJob {
        job_id: id,
        deleted: true,
    }))
}

/// `GET /api/jobs/{id}/tree?where=`
pub async fn get_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<WhereQuery>,
) -> Result<Response, AppError> {
    let tree = state.service.tree(&id, query.side).await?;
    Ok(ok(TreeResponse {
        job_id: id,
        side: query.side,
        tree,
    }))
}
