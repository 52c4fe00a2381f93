use crate::services::{
    signer::Credentials,
    upload_service::{DEFAULT_GRANT_EXPIRY_SECS, GrantPolicy, MAX_GRANT_EXPIRY_SECS},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};
use url::Url;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageConfig,
}

/// Object-storage control plane settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: Url,
    pub region: String,
    pub credentials: Credentials,
    pub default_bucket: String,
    pub default_expiry_secs: u32,
    pub max_expiry_secs: u32,
    pub reserved_prefixes: Vec<String>,
    /// Prefix for keys derived from an uploaded filename.
    pub key_prefix: String,
    pub timeout: Duration,
}

impl StorageConfig {
    pub fn grant_policy(&self) -> GrantPolicy {
        GrantPolicy::new(self.max_expiry_secs)
            .with_reserved_prefixes(self.reserved_prefixes.iter().cloned())
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload authorization API for the marketplace")]
pub struct Args {
    /// Host to bind to (overrides MARKET_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MARKET_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object storage endpoint, path-style (overrides MARKET_STORAGE_ENDPOINT)
    #[arg(long)]
    pub storage_endpoint: Option<String>,

    /// Storage region used for signing (overrides MARKET_STORAGE_REGION)
    #[arg(long)]
    pub storage_region: Option<String>,

    /// Bucket used when a request names none (overrides MARKET_STORAGE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Longest grant window in seconds (overrides MARKET_MAX_GRANT_EXPIRY)
    #[arg(long)]
    pub max_expiry: Option<u32>,

    /// Issue a single upload grant for this key, print it and exit
    #[arg(long)]
    pub grant_key: Option<String>,

    /// Content type for --grant-key
    #[arg(long, default_value = "application/octet-stream")]
    pub content_type: String,
}

/// One-shot grant requested on the command line.
#[derive(Debug, Clone)]
pub struct GrantCommand {
    pub key: String,
    pub content_type: String,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and an optional
    /// one-shot grant command.
    pub fn from_env_and_args() -> Result<(Self, Option<GrantCommand>)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("MARKET_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("MARKET_PORT", 3000u16)?;
        let env_endpoint =
            env::var("MARKET_STORAGE_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:9000".into());
        let env_region = env::var("MARKET_STORAGE_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_bucket = env::var("MARKET_STORAGE_BUCKET").unwrap_or_else(|_| "marketplace".into());
        let env_max_expiry = env_parse("MARKET_MAX_GRANT_EXPIRY", MAX_GRANT_EXPIRY_SECS)?;
        let default_expiry = env_parse("MARKET_DEFAULT_GRANT_EXPIRY", DEFAULT_GRANT_EXPIRY_SECS)?;
        let timeout_secs = env_parse("MARKET_STORAGE_TIMEOUT_SECS", 10u64)?;
        let access_key =
            env::var("MARKET_STORAGE_ACCESS_KEY").context("MARKET_STORAGE_ACCESS_KEY is required")?;
        let secret_key =
            env::var("MARKET_STORAGE_SECRET_KEY").context("MARKET_STORAGE_SECRET_KEY is required")?;
        let reserved_prefixes = env::var("MARKET_RESERVED_PREFIXES")
            .unwrap_or_else(|_| "_system/".into())
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        let key_prefix = env::var("MARKET_UPLOAD_KEY_PREFIX").unwrap_or_else(|_| "uploads/".into());

        // --- Merge ---
        let endpoint_raw = args.storage_endpoint.unwrap_or(env_endpoint);
        let endpoint = Url::parse(&endpoint_raw)
            .with_context(|| format!("parsing storage endpoint `{}`", endpoint_raw))?;
        let max_expiry_secs = args.max_expiry.unwrap_or(env_max_expiry);
        if max_expiry_secs == 0 || max_expiry_secs > MAX_GRANT_EXPIRY_SECS {
            bail!(
                "max grant expiry must be within 1..={} seconds, got {}",
                MAX_GRANT_EXPIRY_SECS,
                max_expiry_secs
            );
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage: StorageConfig {
                endpoint,
                region: args.storage_region.unwrap_or(env_region),
                credentials: Credentials::new(access_key, secret_key),
                default_bucket: args.bucket.unwrap_or(env_bucket),
                default_expiry_secs: default_expiry.min(max_expiry_secs),
                max_expiry_secs,
                reserved_prefixes,
                key_prefix,
                timeout: Duration::from_secs(timeout_secs),
            },
        };

        let grant = args.grant_key.map(|key| GrantCommand {
            key,
            content_type: args.content_type,
        });

        Ok((cfg, grant))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
