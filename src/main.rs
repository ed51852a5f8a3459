use anyhow::Result;
use dropshare::{
    config::AppConfig,
    routes::routes::app,
    services::{
        blob_store::LocalBlobStore, record_store::SqliteFileStore, share_service::ShareService,
        sweeper::spawn_sweeper,
    },
    state::AppState,
};
use rand::{RngCore, rngs::OsRng};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting dropshare with config: {:?}", cfg.redacted());

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let opts = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?,
    );
    let records = Arc::new(SqliteFileStore::new(db));
    records.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let secret = match &cfg.signing_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            tracing::warn!(
                "DROPSHARE_SIGNING_SECRET not set; generated an ephemeral key, upload URLs will not survive a restart"
            );
            let mut key = vec![0u8; 32];
            OsRng.fill_bytes(&mut key);
            key
        }
    };
    let blobs = Arc::new(LocalBlobStore::new(
        &cfg.storage_dir,
        &cfg.public_url,
        secret,
        chrono::Duration::seconds(cfg.upload_url_ttl_secs as i64),
    ));
    let shares = ShareService::new(records, blobs.clone());

    // --- Background reclamation ---
    let _sweeper = if cfg.sweep_interval_secs > 0 {
        let grace = (cfg.orphan_grace_secs > 0)
            .then(|| chrono::Duration::seconds(cfg.orphan_grace_secs as i64));
        tracing::info!(
            interval_secs = cfg.sweep_interval_secs,
            orphan_grace_secs = cfg.orphan_grace_secs,
            "starting background sweeper"
        );
        Some(spawn_sweeper(
            shares.clone(),
            Duration::from_secs(cfg.sweep_interval_secs),
            grace,
        ))
    } else {
        None
    };

    // --- Build router ---
    let app = app(AppState::new(shares, blobs, &cfg.public_url));

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
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
