//! src/services/upload_service.rs
//!
//! UploadAuthorizationClient: issues time-boxed, single-object write grants
//! (presigned `PUT` URLs) against an S3-compatible object store. Bytes never
//! pass through this service; callers upload directly to storage with the
//! returned URL. The client keeps no state between calls and is safe to use
//! from many tasks at once.

use crate::models::grant::{UploadGrant, UploadRequest};
use crate::services::signer::{Credentials, PresignParams, Presigner, SignError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Hard ceiling for presigned credentials (7 days).
pub const MAX_GRANT_EXPIRY_SECS: u32 = 604_800;
/// Window used when the caller does not ask for one.
pub const DEFAULT_GRANT_EXPIRY_SECS: u32 = 3_600;
/// Lifetime of the signed `HEAD` used to check a bucket.
const PROBE_EXPIRY_SECS: u32 = 60;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Malformed local input, detected before any network call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("object key must not be empty")]
    EmptyKey,
    #[error("object key exceeds 1024 bytes")]
    KeyTooLong,
    #[error("object key `{0}` contains forbidden characters or path segments")]
    UnsafeKey(String),
    #[error("object key `{key}` uses reserved prefix `{prefix}`")]
    ReservedPrefix { key: String, prefix: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("content type `{0}` is not a valid MIME type")]
    InvalidContentType(String),
    #[error("expiry of {requested}s is outside 1..={max}s")]
    ExpiryOutOfRange { requested: u32, max: u32 },
}

/// Why a storage control-plane call failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailureKind {
    /// Connection, DNS or timeout failure.
    #[error("network failure")]
    Network,
    /// Storage rejected the access key or signature.
    #[error("credentials rejected")]
    Credentials,
    /// Storage refused the bucket/key under its policy.
    #[error("rejected by policy")]
    PolicyRejected,
    #[error("bucket not found")]
    BucketNotFound,
    /// Storage answered with a 5xx.
    #[error("storage unavailable")]
    Unavailable,
    #[error("unexpected storage response")]
    Unexpected,
}

/// The storage control-plane call failed. The cause is kept as `source`.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StorageAuthError {
    pub kind: StorageFailureKind,
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageAuthError {
    pub fn new(kind: StorageFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Transient failures worth a limited retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            StorageFailureKind::Network | StorageFailureKind::Unavailable
        )
    }

    fn from_status(status: StatusCode, bucket: &str) -> Self {
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageFailureKind::Credentials,
            StatusCode::NOT_FOUND => StorageFailureKind::BucketNotFound,
            StatusCode::BAD_REQUEST | StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT => {
                StorageFailureKind::PolicyRejected
            }
            s if s.is_server_error() => StorageFailureKind::Unavailable,
            _ => StorageFailureKind::Unexpected,
        };
        Self::new(kind, format!("bucket `{}` check returned {}", bucket, status))
    }
}

impl From<reqwest::Error> for StorageAuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(StorageFailureKind::Network, "storage request failed").with_source(err)
    }
}

impl From<SignError> for StorageAuthError {
    fn from(err: SignError) -> Self {
        Self::new(StorageFailureKind::Unexpected, "could not sign request").with_source(err)
    }
}

/// Every way `request_upload_grant` can fail.
#[derive(Debug, Error)]
pub enum GrantError {
    #[error("invalid upload request: {0}")]
    Validation(#[from] ValidationError),
    #[error("storage authorization failed: {0}")]
    StorageAuth(#[from] StorageAuthError),
}

pub type GrantResult<T> = Result<T, GrantError>;

/// Local rules every request must pass before storage is contacted.
#[derive(Debug, Clone)]
pub struct GrantPolicy {
    max_expiry_secs: u32,
    reserved_prefixes: Vec<String>,
}

impl GrantPolicy {
    /// `max_expiry_secs` is capped at [`MAX_GRANT_EXPIRY_SECS`].
    pub fn new(max_expiry_secs: u32) -> Self {
        Self {
            max_expiry_secs: max_expiry_secs.min(MAX_GRANT_EXPIRY_SECS),
            reserved_prefixes: Vec::new(),
        }
    }

    pub fn with_reserved_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_prefixes = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.is_empty())
            .collect();
        self
    }

    pub fn max_expiry_secs(&self) -> u32 {
        self.max_expiry_secs
    }

    pub fn validate(&self, request: &UploadRequest) -> Result<(), ValidationError> {
        ensure_bucket_name_safe(&request.bucket)?;
        self.ensure_key_allowed(&request.key)?;
        ensure_content_type_valid(&request.content_type)?;
        if request.expires_in_seconds == 0 || request.expires_in_seconds > self.max_expiry_secs {
            return Err(ValidationError::ExpiryOutOfRange {
                requested: request.expires_in_seconds,
                max: self.max_expiry_secs,
            });
        }
        Ok(())
    }

    fn ensure_key_allowed(&self, key: &str) -> Result<(), ValidationError> {
        ensure_key_safe(key)?;
        if let Some(prefix) = self.reserved_prefixes.iter().find(|p| key.starts_with(*p)) {
            return Err(ValidationError::ReservedPrefix {
                key: key.to_string(),
                prefix: prefix.clone(),
            });
        }
        Ok(())
    }
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self::new(MAX_GRANT_EXPIRY_SECS)
    }
}

/// Storage control plane: the API that hands out write capabilities.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Return a URL authorizing one `PUT` of exactly this request.
    async fn authorize_put(
        &self,
        request: &UploadRequest,
        issued_at: DateTime<Utc>,
    ) -> Result<Url, StorageAuthError>;

    /// Check that storage is reachable and accepts our credentials for `bucket`.
    async fn probe(&self, bucket: &str) -> Result<(), StorageAuthError>;
}

/// Control plane for any S3-compatible service (AWS S3, MinIO, ...).
///
/// Each grant costs one signed `HEAD /{bucket}` so bad credentials, missing
/// buckets and policy denials surface at grant time instead of at upload time.
#[derive(Clone)]
pub struct S3ControlPlane {
    http: reqwest::Client,
    presigner: Presigner,
    region: String,
}

impl S3ControlPlane {
    pub fn new(
        endpoint: Url,
        region: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, StorageAuthError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            presigner: Presigner::new(endpoint, credentials),
            region: region.into(),
        })
    }

    async fn check_bucket(
        &self,
        bucket: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(), StorageAuthError> {
        let path = Presigner::object_path(bucket, None);
        let url = self.presigner.presign(&PresignParams {
            method: "HEAD",
            canonical_path: &path,
            signed_headers: &[],
            region: &self.region,
            expires_in_seconds: PROBE_EXPIRY_SECS,
            issued_at,
        })?;

        debug!("checking bucket {} at {}", bucket, self.presigner.endpoint());
        let response = self.http.head(url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StorageAuthError::from_status(status, bucket))
        }
    }
}

#[async_trait]
impl ControlPlane for S3ControlPlane {
    async fn authorize_put(
        &self,
        request: &UploadRequest,
        issued_at: DateTime<Utc>,
    ) -> Result<Url, StorageAuthError> {
        self.check_bucket(&request.bucket, issued_at).await?;

        let path = Presigner::object_path(&request.bucket, Some(&request.key));
        let url = self.presigner.presign(&PresignParams {
            method: "PUT",
            canonical_path: &path,
            signed_headers: &[("content-type", request.content_type.as_str())],
            region: &self.region,
            expires_in_seconds: request.expires_in_seconds,
            issued_at,
        })?;
        Ok(url)
    }

    async fn probe(&self, bucket: &str) -> Result<(), StorageAuthError> {
        self.check_bucket(bucket, Utc::now()).await
    }
}

/// Issues upload grants. Cheap to clone; holds no per-call state.
///
/// Dropping the future returned by [`request_upload_grant`](Self::request_upload_grant)
/// cancels the outbound call; nothing needs cleaning up on the storage side.
#[derive(Clone)]
pub struct UploadAuthorizationClient {
    control_plane: Arc<dyn ControlPlane>,
    policy: GrantPolicy,
}

impl UploadAuthorizationClient {
    pub fn new(control_plane: Arc<dyn ControlPlane>, policy: GrantPolicy) -> Self {
        Self {
            control_plane,
            policy,
        }
    }

    pub fn policy(&self) -> &GrantPolicy {
        &self.policy
    }

    /// Validate locally, then ask the control plane for a presigned `PUT`.
    ///
    /// A single request/response; retries are up to the caller.
    pub async fn request_upload_grant(&self, request: UploadRequest) -> GrantResult<UploadGrant> {
        self.policy.validate(&request)?;

        let issued_at = Utc::now();
        let url = match self.control_plane.authorize_put(&request, issued_at).await {
            Ok(url) => url,
            Err(err) => {
                warn!(
                    "upload grant for {}/{} failed: {}",
                    request.bucket, request.key, err
                );
                return Err(err.into());
            }
        };

        info!(
            "issued upload grant for {}/{} ({}, {}s)",
            request.bucket, request.key, request.content_type, request.expires_in_seconds
        );
        Ok(UploadGrant::new(url, request, issued_at))
    }

    /// Readiness check against the storage control plane.
    pub async fn probe(&self, bucket: &str) -> Result<(), StorageAuthError> {
        self.control_plane.probe(bucket).await
    }
}

/// Reject empty, oversized and path-traversing keys.
fn ensure_key_safe(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(ValidationError::KeyTooLong);
    }
    if key.starts_with('/')
        || key.split('/').any(|segment| segment == ".." || segment == ".")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(ValidationError::UnsafeKey(key.to_string()));
    }
    Ok(())
}

/// S3 bucket naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - start and end with a letter or digit
/// - no consecutive dots or dot-hyphen pairs
/// - not shaped like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    let is_edge = |c: char| c == '.' || c == '-';
    if name.starts_with(is_edge) || name.ends_with(is_edge) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// `type/subtype` with RFC 7230 token characters, optionally followed by
/// `;`-separated parameters. Surrounding whitespace is rejected because the
/// value is signed verbatim.
fn ensure_content_type_valid(content_type: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidContentType(content_type.to_string());

    if content_type.trim() != content_type
        || content_type.bytes().any(|b| b.is_ascii_control())
        || content_type.contains("  ")
    {
        return Err(invalid());
    }

    let essence = content_type.split(';').next().unwrap_or("").trim();
    let (kind, subtype) = essence.split_once('/').ok_or_else(invalid)?;
    let is_token = |s: &str| {
        !s.is_empty()
            && s.chars().all(|c| {
                c.is_ascii_alphanumeric()
                    || matches!(
                        c,
                        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_'
                            | '`' | '|' | '~'
                    )
            })
    };
    if !is_token(kind) || !is_token(subtype) {
        return Err(invalid());
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
