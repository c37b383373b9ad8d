use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub io_engine: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "S3-compatible deduplicating object store")]
pub struct Args {
    /// Host to bind to (overrides DEDUPSTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DEDUPSTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blocks and metadata are stored (overrides DEDUPSTORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Storage engine: fileio or memio (overrides DEDUPSTORE_IO)
    #[arg(long)]
    pub io: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("DEDUPSTORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("DEDUPSTORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing DEDUPSTORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading DEDUPSTORE_PORT"),
        };
        let env_storage = env::var("DEDUPSTORE_STORAGE_DIR").unwrap_or_else(|_| "./data/store".into());
        let env_io = env::var("DEDUPSTORE_IO").unwrap_or_else(|_| "fileio".into());

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            io_engine: args.io.unwrap_or(env_io),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
