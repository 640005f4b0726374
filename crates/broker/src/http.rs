// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! HTTP listener: a thin axum surface over [`ExecutionService`].
//!
//! Routes mirror the service operations one to one; everything
//! interesting happens below this layer.

use crate::service::{ExecuteRequest, ExecutionService};
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use crucible_core::{Clock, Error, ErrorKind};
use crucible_orchestrator::Orchestrator;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn router<O: Orchestrator, C: Clock>(service: Arc<ExecutionService<O, C>>) -> Router {
    Router::new()
        .route("/v1/execute", post(execute::<O, C>))
        .route("/v1/upload", post(upload::<O, C>))
        .route("/v1/download", post(download::<O, C>))
        .route("/v1/expire", post(expire::<O, C>))
        .route("/v1/parse-custom-tool", post(parse_custom_tool::<O, C>))
        .route("/v1/execute-custom-tool", post(execute_custom_tool::<O, C>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    chat_id: String,
    file_hash: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct ExpireRequest {
    chat_id: String,
    file_hash: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct ParseToolRequest {
    tool_source_code: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteToolRequest {
    tool_source_code: String,
    /// Accepts either a JSON document or a string containing one.
    tool_input_json: serde_json::Value,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl ExecuteToolRequest {
    fn input_as_string(&self) -> Result<String, Error> {
        match &self.tool_input_json {
            serde_json::Value::String(s) => Ok(s.clone()),
            other => serde_json::to_string(other)
                .map_err(|e| Error::invalid_argument(format!("tool input: {}", e))),
        }
    }
}

async fn execute<O: Orchestrator, C: Clock>(
    State(service): State<Arc<ExecutionService<O, C>>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    Ok(Json(service.execute(req).await?).into_response())
}

async fn upload<O: Orchestrator, C: Clock>(
    State(service): State<Arc<ExecutionService<O, C>>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut chat_id: Option<String> = None;
    let mut max_downloads: Option<u32> = None;
    let mut expires_days: Option<u64> = None;
    let mut expires_seconds: Option<u64> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid_argument(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chat_id" => chat_id = Some(read_text(field).await?),
            "max_downloads" => max_downloads = Some(parse_field(field).await?),
            "expires_days" => expires_days = Some(parse_field(field).await?),
            "expires_seconds" => expires_seconds = Some(parse_field(field).await?),
            "upload" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::invalid_argument("upload field has no filename"))?;
                let bytes = field.bytes().await.map_err(|e| {
                    Error::invalid_argument(format!("upload stream aborted: {}", e))
                })?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| Error::invalid_argument("missing upload field"))?;
    let resp = service
        .upload(
            chat_id.as_deref(),
            &filename,
            &bytes,
            max_downloads,
            expires_days,
            expires_seconds,
        )
        .await?;
    Ok(Json(resp).into_response())
}

async fn download<O: Orchestrator, C: Clock>(
    State(service): State<Arc<ExecutionService<O, C>>>,
    Json(req): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let (bytes, _) = service.download(&req.chat_id, &req.filename, &req.file_hash).await?;
    let disposition = format!("attachment; filename=\"{}\"", req.filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn expire<O: Orchestrator, C: Clock>(
    State(service): State<Arc<ExecutionService<O, C>>>,
    Json(req): Json<ExpireRequest>,
) -> Result<Response, ApiError> {
    service.expire(&req.chat_id, &req.filename, &req.file_hash).await?;
    Ok(Json(json!({"success": true})).into_response())
}

async fn parse_custom_tool<O: Orchestrator, C: Clock>(
    State(service): State<Arc<ExecutionService<O, C>>>,
    Json(req): Json<ParseToolRequest>,
) -> Result<Response, ApiError> {
    Ok(Json(service.parse_custom_tool(&req.tool_source_code)?).into_response())
}

async fn execute_custom_tool<O: Orchestrator, C: Clock>(
    State(service): State<Arc<ExecutionService<O, C>>>,
    Json(req): Json<ExecuteToolRequest>,
) -> Result<Response, ApiError> {
    let input = req.input_as_string()?;
    let resp =
        service.execute_custom_tool(&req.tool_source_code, &input, &req.env).await?;
    Ok(Json(resp).into_response())
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, Error> {
    field.text().await.map_err(|e| Error::invalid_argument(format!("bad form field: {}", e)))
}

async fn parse_field<T: std::str::FromStr>(
    field: axum::extract::multipart::Field<'_>,
) -> Result<T, Error> {
    let name = field.name().unwrap_or_default().to_string();
    let text = read_text(field).await?;
    text.parse().map_err(|_| {
        Error::invalid_argument(format!("unparseable form field {}: {:?}", name, text))
    })
}

/// Error wrapper so handlers can use `?` on service errors.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument | ErrorKind::InvalidTool => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Expired => StatusCode::GONE,
        ErrorKind::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::WorkspaceProjectionFailed
        | ErrorKind::ExecutionFailed
        | ErrorKind::InvalidToolOutput
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            tracing::error!(kind = %self.0.kind(), error = %self.0.message(), "request failed");
        }
        let body = json!({
            "error": self.0.kind().to_string(),
            "message": self.0.message(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
