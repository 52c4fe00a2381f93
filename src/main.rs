use anyhow::Result;
use axum::Router;
use marketplace_core::{
    config::{AppConfig, GrantCommand},
    models::grant::UploadRequest,
    routes,
    services::upload_service::{S3ControlPlane, UploadAuthorizationClient},
    state::{AppState, GrantDefaults},
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + one-shot grant flag ---
    let (cfg, grant_command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting marketplace-core with config: {:?}", cfg);

    // --- Initialize upload authorization ---
    let control_plane = S3ControlPlane::new(
        cfg.storage.endpoint.clone(),
        cfg.storage.region.clone(),
        cfg.storage.credentials.clone(),
        cfg.storage.timeout,
    )?;
    let uploads =
        UploadAuthorizationClient::new(Arc::new(control_plane), cfg.storage.grant_policy());
    let defaults = GrantDefaults::from(&cfg.storage);

    // --- Handle one-shot grant mode ---
    if let Some(command) = grant_command {
        issue_single_grant(&uploads, &defaults, command).await?;
        return Ok(()); // exit after printing the grant
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState::new(uploads, defaults));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Request one grant against the default bucket and print it as JSON.
async fn issue_single_grant(
    uploads: &UploadAuthorizationClient,
    defaults: &GrantDefaults,
    command: GrantCommand,
) -> Result<()> {
    let request = UploadRequest::new(
        defaults.bucket.clone(),
        command.key,
        command.content_type,
        defaults.expires_in_seconds,
    );
    let grant = uploads.request_upload_grant(request).await?;
    println!("{}", serde_json::to_string_pretty(&grant)?);
    Ok(())
}
