use anyhow::Result;
use axum::Router;
use std::{fs, path::Path};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use dedupstore::{config::AppConfig, handlers::AppState, routes::routes, store};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting dedupstore with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if cfg.io_engine == "fileio" && !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize storage engine ---
    let store = store::open_engine(&cfg.io_engine, Path::new(&cfg.storage_dir))
        .ok_or_else(|| anyhow::anyhow!("unknown storage engine `{}`", cfg.io_engine))?;
    tracing::info!("created storage engine, type {}", cfg.io_engine);

    // --- Build router ---
    let app: Router = routes().with_state(AppState { store });

    // --- Start server ---
    let addr = cfg.addr();
    tracing::info!("Server listening on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
