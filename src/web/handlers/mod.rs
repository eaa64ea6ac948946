//! HTTP request handlers organized by resource

pub mod download;
pub mod files;
pub mod fs;
pub mod health;
pub mod jobs;
pub mod processing;

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

use crate::services::OpenedFile;

/// Header-safe file name: visible ASCII only, no quotes or backslashes.
fn header_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    if cleaned.trim().is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

/// Stream an opened file with its content type, optionally as an attachment.
pub(crate) fn file_response(opened: OpenedFile, attachment: bool) -> Response {
    let content_type = HeaderValue::from_str(&opened.content_type)
        .unwrap_or(HeaderValue::from_static(job_sandbox::content_type::OCTET_STREAM));
    let mut response = Body::from_stream(ReaderStream::new(opened.file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(opened.size));
    if attachment {
        let disposition = format!(
            "attachment; filename=\"{}\"",
            header_file_name(&opened.file_name)
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}
