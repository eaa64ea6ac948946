//! File content handlers

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::file_response;
use crate::errors::AppError;
use crate::web::{
    AppState,
    extractors::{ApiJson, ApiQuery, FileQuery, PathQuery, SaveBody},
    responses::ok,
};

#[derive(Debug, Serialize)]
pub struct SavedFile {
    pub path: String,
    pub bytes_written: u64,
}

/// `GET /api/jobs/{id}/file?path=&where=&as_text=`
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<FileQuery>,
) -> Result<Response, AppError> {
    if query.as_text {
        let text = state.service.read_text(&id, query.side, &query.path).await?;
        return Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response());
    }
    let opened = state.service.open_file(&id, query.side, &query.path).await?;
    Ok(file_response(opened, false))
}

/// `GET /api/jobs/{id}/raw?path=&where=`
pub async fn get_raw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<PathQuery>,
) -> Result<Response, AppError> {
    let raw = state.service.read_raw(&id, query.side, &query.path).await?;
    Ok(([(header::CONTENT_TYPE, raw.content_type)], raw.bytes).into_response())
}

/// `PUT /api/jobs/{id}/file?path=&where=`
pub async fn save_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<PathQuery>,
    ApiJson(body): ApiJson<SaveBody>,
) -> Result<Response, AppError> {
    let bytes_written = state
        .service
        .save_text(&id, query.side, &query.path, body.content)
        .await?;
    Ok(ok(SavedFile {
        path: query.path,
        bytes_written,
    }))
}
