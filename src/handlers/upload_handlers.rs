//! HTTP handler that turns an upload intent into a presigned grant.
//! The browser then `PUT`s the file straight to storage with the returned URL;
//! no object bytes reach this service.

use crate::{
    errors::AppError,
    models::grant::{ObjectKey, UploadGrant, UploadRequest},
    state::AppState,
};
use axum::{Json, extract::State};
use serde::Deserialize;

/// Body of `POST /uploads/grant`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequestBody {
    pub bucket: Option<String>,
    /// Exact object key. Takes precedence over `filename`.
    pub key: Option<String>,
    /// Original filename; a unique key is derived from it when `key` is absent.
    pub filename: Option<String>,
    pub content_type: String,
    pub expires_in_seconds: Option<u32>,
}

/// `POST /uploads/grant`
pub async fn create_upload_grant(
    State(state): State<AppState>,
    Json(body): Json<GrantRequestBody>,
) -> Result<Json<UploadGrant>, AppError> {
    let key = match (body.key, body.filename) {
        (Some(key), _) => key,
        (None, Some(filename)) => ObjectKey::derive(&state.defaults.key_prefix, &filename),
        (None, None) => return Err(AppError::bad_request("either key or filename is required")),
    };

    let request = UploadRequest {
        bucket: body
            .bucket
            .unwrap_or_else(|| state.defaults.bucket.clone()),
        key,
        content_type: body.content_type,
        expires_in_seconds: body
            .expires_in_seconds
            .unwrap_or(state.defaults.expires_in_seconds),
    };

    let grant = state.uploads.request_upload_grant(request).await?;
    Ok(Json(grant))
}
