//! Download handler: one file, or the whole side as a zip

use axum::{
    extract::{Path, State},
    response::Response,
};

use super::file_response;
use crate::errors::AppError;
use crate::web::{
    AppState,
    extractors::{ApiQuery, DownloadQuery},
    responses::bad_request,
};

/// `GET /api/jobs/{id}/download?where=&zip=&path=`
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<DownloadQuery>,
) -> Result<Response, AppError> {
    if query.zip {
        let bundle = state.service.open_bundle(&id, query.side).await?;
        return Ok(file_response(bundle, true));
    }
    let Some(path) = query.path.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Ok(bad_request("path is required unless zip=true"));
    };
    let opened = state.service.open_file(&id, query.side, path).await?;
    Ok(file_response(opened, true))
}
