//! Shared state handed to every axum handler.

use crate::config::StorageConfig;
use crate::services::upload_service::UploadAuthorizationClient;

/// Fallbacks applied to grant requests that leave fields out.
#[derive(Debug, Clone)]
pub struct GrantDefaults {
    pub bucket: String,
    pub expires_in_seconds: u32,
    pub key_prefix: String,
}

impl From<&StorageConfig> for GrantDefaults {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            bucket: cfg.default_bucket.clone(),
            expires_in_seconds: cfg.default_expiry_secs,
            key_prefix: cfg.key_prefix.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadAuthorizationClient,
    pub defaults: GrantDefaults,
}

impl AppState {
    pub fn new(uploads: UploadAuthorizationClient, defaults: GrantDefaults) -> Self {
        Self { uploads, defaults }
    }
}
