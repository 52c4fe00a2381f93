#![allow(dead_code)]

use marketplace_core::services::{
    signer::Credentials,
    upload_service::{GrantPolicy, S3ControlPlane, UploadAuthorizationClient},
};
use std::{sync::Arc, time::Duration};
use url::Url;

pub const ACCESS_KEY: &str = "minioadmin";
pub const SECRET_KEY: &str = "minioadmin-secret";

pub fn control_plane(endpoint: &str) -> S3ControlPlane {
    S3ControlPlane::new(
        Url::parse(endpoint).unwrap(),
        "us-east-1",
        Credentials::new(ACCESS_KEY, SECRET_KEY),
        Duration::from_secs(5),
    )
    .unwrap()
}

pub fn upload_client(endpoint: &str, policy: GrantPolicy) -> UploadAuthorizationClient {
    UploadAuthorizationClient::new(Arc::new(control_plane(endpoint)), policy)
}

/// An address nothing listens on.
pub fn closed_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
