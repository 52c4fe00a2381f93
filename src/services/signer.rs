//! AWS Signature Version 4 query-string presigning.
//!
//! Produces URLs that an S3-compatible service accepts without any further
//! authentication. Addressing is path-style (`{endpoint}/{bucket}/{key}`),
//! which works for self-hosted deployments without wildcard DNS.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Access key pair for the storage service. `Debug` hides the secret.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("endpoint `{0}` has no host")]
    MissingHost(String),
    #[error("failed to build presigned url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid signing key")]
    Key,
}

/// Everything that goes into one signature.
#[derive(Debug, Clone)]
pub struct PresignParams<'a> {
    pub method: &'a str,
    /// Already-encoded absolute path, e.g. `/bucket/photos/a%20b.jpg`.
    pub canonical_path: &'a str,
    /// Extra headers the caller promises to send, lower-case names.
    /// `host` is always signed and must not be listed here.
    pub signed_headers: &'a [(&'a str, &'a str)],
    pub region: &'a str,
    pub expires_in_seconds: u32,
    pub issued_at: DateTime<Utc>,
}

/// Signs requests against one endpoint with one set of credentials.
///
/// Only the endpoint's origin is used; any path on it is ignored.
#[derive(Debug, Clone)]
pub struct Presigner {
    endpoint: Url,
    credentials: Credentials,
}

impl Presigner {
    pub fn new(endpoint: Url, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Path-style canonical path for `bucket` and an optional object key.
    pub fn object_path(bucket: &str, key: Option<&str>) -> String {
        let mut path = format!("/{}", uri_encode(bucket, true));
        if let Some(key) = key {
            path.push('/');
            path.push_str(&uri_encode(key, false));
        }
        path
    }

    /// Build a presigned URL.
    pub fn presign(&self, params: &PresignParams<'_>) -> Result<Url, SignError> {
        let host = host_header(&self.endpoint)?;
        let amz_date = params.issued_at.format("%Y%m%dT%H%M%SZ").to_string();
        let short_date = params.issued_at.format("%Y%m%d").to_string();
        let scope = format!(
            "{}/{}/{}/aws4_request",
            short_date, params.region, SERVICE
        );

        let mut headers: Vec<(String, String)> = params
            .signed_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), canonical_header_value(value)))
            .collect();
        headers.push(("host".to_string(), host));
        headers.sort();

        let signed_header_names = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();

        let credential = format!("{}/{}", self.credentials.access_key, scope);
        let mut query = vec![
            ("X-Amz-Algorithm", ALGORITHM.to_string()),
            ("X-Amz-Credential", credential),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", params.expires_in_seconds.to_string()),
            ("X-Amz-SignedHeaders", signed_header_names.clone()),
        ];
        query.sort_by(|a, b| a.0.cmp(b.0));
        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            params.method,
            params.canonical_path,
            canonical_query,
            canonical_headers,
            signed_header_names,
            UNSIGNED_PAYLOAD
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.signing_key(&short_date, params.region)?;
        let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes())?);

        let url = format!(
            "{}{}?{}&X-Amz-Signature={}",
            self.endpoint.origin().ascii_serialization(),
            params.canonical_path,
            canonical_query,
            signature
        );
        Ok(Url::parse(&url)?)
    }

    fn signing_key(&self, short_date: &str, region: &str) -> Result<Vec<u8>, SignError> {
        let secret = format!("AWS4{}", self.credentials.secret_key);
        let k_date = hmac(secret.as_bytes(), short_date.as_bytes())?;
        let k_region = hmac(&k_date, region.as_bytes())?;
        let k_service = hmac(&k_region, SERVICE.as_bytes())?;
        hmac(&k_service, b"aws4_request")
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SignError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SignError::Key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `Host` header value as S3 expects it: port only when non-default.
/// Trimmed, with runs of inner whitespace collapsed to one space.
fn canonical_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn host_header(endpoint: &Url) -> Result<String, SignError> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| SignError::MissingHost(endpoint.to_string()))?;
    Ok(match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// SigV4 URI encoding: everything but `A-Za-z0-9-_.~` is percent-encoded
/// with upper-case hex. `/` is kept as-is unless `encode_slash` is set.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
