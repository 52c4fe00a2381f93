//! Client core for the industrial-equipment marketplace.
//!
//! Two pieces with real contracts live here:
//! - [`services::session_manager::SessionManager`]: the signed-in user and
//!   their access token, observable by every view and by the backend client.
//! - [`services::upload_service::UploadAuthorizationClient`]: issues
//!   time-boxed presigned `PUT` URLs so files go straight to object storage.
//!
//! The `handlers`/`routes` modules expose the upload client over HTTP.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
