//! Upload authorization requests and the presigned grants issued for them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// One requested write capability for a single object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Storage namespace.
    pub bucket: String,

    /// Object path within the bucket. Must be unique per logical object.
    pub key: String,

    /// MIME type the upload will be sent with.
    pub content_type: String,

    /// Validity window of the grant.
    pub expires_in_seconds: u32,
}

impl UploadRequest {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        content_type: impl Into<String>,
        expires_in_seconds: u32,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            content_type: content_type.into(),
            expires_in_seconds,
        }
    }
}

/// A time-boxed, object-scoped write capability.
///
/// The URL authorizes exactly one `PUT` of `key` in `bucket` with the given
/// content type until `expires_at`. Grants are never mutated after issuance;
/// a retried upload needs a fresh grant.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    url: Url,
    method: &'static str,
    bucket: String,
    key: String,
    content_type: String,
    expires_in_seconds: u32,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl UploadGrant {
    pub(crate) fn new(url: Url, request: UploadRequest, issued_at: DateTime<Utc>) -> Self {
        let expires_at = issued_at + Duration::seconds(i64::from(request.expires_in_seconds));
        Self {
            url,
            method: "PUT",
            bucket: request.bucket,
            key: request.key,
            content_type: request.content_type,
            expires_in_seconds: request.expires_in_seconds,
            issued_at,
            expires_at,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// HTTP verb the URL is signed for.
    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn expires_in_seconds(&self) -> u32 {
        self.expires_in_seconds
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this grant covers an upload of exactly this triple at `now`.
    pub fn authorizes(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.bucket == bucket
            && self.key == key
            && self.content_type == content_type
            && !self.is_expired_at(now)
    }
}

/// Helpers for building object keys on behalf of callers.
pub struct ObjectKey;

impl ObjectKey {
    /// Build a collision-free key `{prefix}{uuid}-{filename}`.
    ///
    /// The filename is reduced to its last path segment, and characters
    /// outside `[A-Za-z0-9._-]` are replaced with `_`.
    pub fn derive(prefix: &str, filename: &str) -> String {
        let base = filename
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(filename)
            .trim();
        let sanitized: String = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let sanitized = sanitized.trim_start_matches('.');

        if sanitized.is_empty() {
            format!("{}{}", prefix, Uuid::new_v4())
        } else {
            format!("{}{}-{}", prefix, Uuid::new_v4(), sanitized)
        }
    }
}
