//! Request extractors and parameter types
//!
//! [`ApiQuery`] and [`ApiJson`] wrap axum's extractors so that malformed
//! parameters are rejected with the standard error envelope.

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    response::Response,
};
use job_sandbox::JobSide;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};

use super::responses::bad_request;
use crate::processing::{PackRequest, ProcessRequest, ProcessingMode};

/// Query string extractor answering with an [`ApiResponse`](super::ApiResponse) on failure
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| bad_request(&format!("Invalid query parameters: {}", e.body_text())))?;
        Ok(Self(value))
    }
}

/// JSON body extractor answering with an [`ApiResponse`](super::ApiResponse) on failure
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| bad_request(&format!("Invalid request body: {}", e.body_text())))?;
        Ok(Self(value))
    }
}

/// Accepts `1/0`, `true/false`, `yes/no` and `on/off`, case-insensitively.
pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {other:?}"
        ))),
    }
}

fn default_true() -> bool {
    true
}

/// `?where=` selector; defaults to the output side
#[derive(Debug, Clone, Deserialize)]
pub struct WhereQuery {
    #[serde(rename = "where", default)]
    pub side: JobSide,
}

/// `?where=&path=`
#[derive(Debug, Clone, Deserialize)]
pub struct PathQuery {
    #[serde(rename = "where", default)]
    pub side: JobSide,
    pub path: String,
}

/// `?where=&path=&as_text=`
#[derive(Debug, Clone, Deserialize)]
pub struct FileQuery {
    #[serde(rename = "where", default)]
    pub side: JobSide,
    pub path: String,
    #[serde(default = "default_true", deserialize_with = "flexible_bool")]
    pub as_text: bool,
}

/// `?where=&zip=&path=`
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadQuery {
    #[serde(rename = "where", default)]
    pub side: JobSide,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub zip: bool,
    #[serde(default)]
    pub path: Option<String>,
}

/// `?mode=&try_harder=&pack_*=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessQuery {
    #[serde(default)]
    pub mode: ProcessingMode,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub try_harder: bool,
    #[serde(default)]
    pub pack_source_where: Option<JobSide>,
    #[serde(default)]
    pub pack_source_path: Option<String>,
    #[serde(default)]
    pub pack_name: Option<String>,
    #[serde(default)]
    pub pack_version: Option<u8>,
    #[serde(default)]
    pub pack_key_hex: Option<String>,
    #[serde(default)]
    pub pack_padding: Option<u32>,
}

impl ProcessQuery {
    pub fn into_request(self) -> ProcessRequest {
        let defaults = PackRequest::for_process();
        let pack = PackRequest {
            source_where: self.pack_source_where.unwrap_or(defaults.source_where),
            source_path: self.pack_source_path.unwrap_or(defaults.source_path),
            name: self.pack_name.unwrap_or(defaults.name),
            version: self.pack_version.unwrap_or(defaults.version),
            key_hex: self.pack_key_hex.unwrap_or(defaults.key_hex),
            padding: self.pack_padding.unwrap_or(defaults.padding),
        };
        ProcessRequest {
            mode: self.mode,
            try_harder: self.try_harder,
            pack: Some(pack),
        }
    }
}

/// Body of `POST /fs/move`
#[derive(Debug, Clone, Deserialize)]
pub struct MoveBody {
    #[serde(rename = "where", default)]
    pub side: JobSide,
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub overwrite: bool,
}

/// Body of `POST /fs/mkdir`
#[derive(Debug, Clone, Deserialize)]
pub struct MkdirBody {
    #[serde(rename = "where", default)]
    pub side: JobSide,
    pub path: String,
}

/// Body of `PUT /file`
#[derive(Debug, Clone, Deserialize)]
pub struct SaveBody {
    pub content: String,
}
