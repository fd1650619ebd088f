use crate::services::{
    multipart::{
        DEFAULT_MAX_PARTS_IN_FLIGHT, DEFAULT_PART_SIZE, MULTIPART_THRESHOLD, MultipartConfig,
    },
    storage_service::{StoreOptions, StoreType},
};
use crate::models::bucket::DEFAULT_REGION;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// `fs://<dir>`, `s3://<bucket>`, or `memory://<bucket>`.
    pub location: String,
    pub store_type: Option<StoreType>,
    pub region: String,
    pub prefix: Option<String>,
    pub endpoint: Option<String>,
    pub multipart_threshold: u64,
    pub part_size: u64,
    pub max_parts_in_flight: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Uniform blob storage over a directory or an object store")]
pub struct Args {
    /// Host to bind to (overrides BLOB_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOB_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage location (overrides BLOB_STORE_LOCATION)
    #[arg(long)]
    pub location: Option<String>,

    /// Force a backend instead of detecting it from the location scheme
    /// (overrides BLOB_STORE_TYPE)
    #[arg(long, value_enum)]
    pub store_type: Option<StoreType>,

    /// Object-store region (overrides BLOB_STORE_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Key namespace applied to every object-store key (overrides BLOB_STORE_PREFIX)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Custom object-store endpoint (overrides BLOB_STORE_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Declared lengths above this many bytes use multipart upload
    /// (overrides BLOB_STORE_MULTIPART_THRESHOLD)
    #[arg(long)]
    pub multipart_threshold: Option<u64>,

    /// Multipart part size in bytes (overrides BLOB_STORE_PART_SIZE)
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Parts uploading at once (overrides BLOB_STORE_MAX_PARTS_IN_FLIGHT)
    #[arg(long)]
    pub max_parts_in_flight: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse())
    }

    /// Merge parsed CLI args over `BLOB_STORE_*` environment variables.
    pub fn merge(args: Args) -> Result<Self> {
        let env_type = match env::var("BLOB_STORE_TYPE") {
            Ok(value) => Some(match value.to_ascii_lowercase().as_str() {
                "fs" => StoreType::Fs,
                "s3" => StoreType::S3,
                "memory" => StoreType::Memory,
                other => anyhow::bail!("unknown BLOB_STORE_TYPE `{}`", other),
            }),
            Err(env::VarError::NotPresent) => None,
            Err(err) => return Err(err).context("reading BLOB_STORE_TYPE"),
        };

        Ok(Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("BLOB_STORE_HOST", "0.0.0.0")),
            port: pick(args.port, "BLOB_STORE_PORT", 3000)?,
            location: args
                .location
                .unwrap_or_else(|| env_or("BLOB_STORE_LOCATION", "fs://./data/blobs")),
            store_type: args.store_type.or(env_type),
            region: args
                .region
                .unwrap_or_else(|| env_or("BLOB_STORE_REGION", DEFAULT_REGION)),
            prefix: args.prefix.or_else(|| env::var("BLOB_STORE_PREFIX").ok()),
            endpoint: args.endpoint.or_else(|| env::var("BLOB_STORE_ENDPOINT").ok()),
            multipart_threshold: pick(
                args.multipart_threshold,
                "BLOB_STORE_MULTIPART_THRESHOLD",
                MULTIPART_THRESHOLD,
            )?,
            part_size: pick(args.part_size, "BLOB_STORE_PART_SIZE", DEFAULT_PART_SIZE)?,
            max_parts_in_flight: pick(
                args.max_parts_in_flight,
                "BLOB_STORE_MAX_PARTS_IN_FLIGHT",
                DEFAULT_MAX_PARTS_IN_FLIGHT,
            )?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Backend options for `StorageService::open`.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            store_type: self.store_type,
            region: self.region.clone(),
            prefix: self.prefix.clone(),
            endpoint: self.endpoint.clone(),
            multipart: MultipartConfig {
                threshold: self.multipart_threshold,
                part_size: self.part_size.max(1),
                max_in_flight: self.max_parts_in_flight.max(1),
            },
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T>(arg: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
