use anyhow::{Context, Result};
use bucket_gateway::{
    config::AppConfig,
    create_router,
    credentials::Credentials,
    state::AppState,
    store::{local::LocalStore, signing::UrlSigner},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let filter = match cfg.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid GATEWAY_LOG_LEVEL `{}`", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("starting bucket-gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "listen={} storage_dir={} database_url={} credentials={} settings={:?}",
        cfg.addr(),
        cfg.storage_dir,
        cfg.database_url,
        cfg.credentials_path.display(),
        cfg.settings
    );

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Credentials ---
    if let Some(content) = cfg.credentials_content.as_deref() {
        Credentials::materialize(&cfg.credentials_path, content)?;
    }
    let credentials = Credentials::load(&cfg.credentials_path)?;
    let signer = UrlSigner::new(&credentials, cfg.public_url.clone());

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

    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database url `{}`", cfg.database_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    let store = LocalStore::new(db, cfg.storage_dir.clone(), signer);
    store.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Build router ---
    let app = create_router(AppState::new(Arc::new(store), cfg.settings.clone()));

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
