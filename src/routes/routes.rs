//! Defines the HTTP surface of the upload authorization API.
//!
//! ## Structure
//! - `GET  /healthz`       : liveness
//! - `GET  /readyz`        : storage control-plane readiness
//! - `POST /uploads/grant` : issue a presigned `PUT` for one object

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::create_upload_grant,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. State is attached by the caller with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/uploads/grant", post(create_upload_grant))
}
