//! Move, mkdir and delete handlers

use axum::{
    extract::{Path, State},
    response::Response,
};
use job_sandbox::JobSide;
use serde::Serialize;

use crate::errors::AppError;
use crate::web::{
    AppState,
    extractors::{ApiJson, ApiQuery, MkdirBody, MoveBody, PathQuery},
    responses::ok,
};

#[derive(Debug, Serialize)]
pub struct FsResult {
    #[serde(rename = "where")]
    pub side: JobSide,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// `POST /api/jobs/{id}/fs/move`
pub async fn move_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<MoveBody>,
) -> Result<Response, AppError> {
    state
        .service
        .move_entry(&id, body.side, &body.src, &body.dst, body.overwrite)
        .await?;
    Ok(ok(FsResult {
        side: body.side,
        path: body.dst,
        from: Some(body.src),
    }))
}

/// `POST /api/jobs/{id}/fs/mkdir`
pub async fn make_dir(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<MkdirBody>,
) -> Result<Response, AppError> {
    state.service.make_dir(&id, body.side, &body.path).await?;
    Ok(ok(FsResult {
        side: body.side,
        path: body.path,
        from: None,
    }))
}

/// `DELETE /api/jobs/{id}/fs?where=&path=`
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<PathQuery>,
) -> Result<Response, AppError> {
    state
        .service
        .delete_entry(&id, query.side, &query.path)
        .await?;
    Ok(ok(FsResult {
        side: query.side,
        path: query.path,
        from: None,
    }))
}
