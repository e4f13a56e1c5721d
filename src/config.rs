use crate::services::transfer::DEFAULT_CHUNK_SIZE;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

pub const DEFAULT_DT_PATTERN: &str = "%Y-%m-%d %H:%M:%S%.f%z";
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub credentials_path: PathBuf,
    /// Raw credentials to write to `credentials_path` before loading.
    pub credentials_content: Option<String>,
    pub public_url: String,
    pub log_level: Option<String>,
    pub settings: GatewaySettings,
}

/// Request-handling knobs shared read-only by every request.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Items requested per listing page.
    pub page_size: usize,
    /// chrono pattern used to parse `since`.
    pub dt_pattern: String,
    /// Bytes per ranged read when downloading.
    pub chunk_size: u64,
    /// Also end listings on the first page shorter than `page_size`.
    pub short_page_stop: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            dt_pattern: DEFAULT_DT_PATTERN.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            short_page_stop: false,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP gateway for bucket object storage")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Signing credentials file (overrides GATEWAY_CREDENTIALS)
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Base URL signed download links point at (overrides GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Listing page size (overrides GATEWAY_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Stop listings on the first short page
    #[arg(long)]
    pub short_page_stop: bool,

    /// Apply the metadata schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse::<u16>("GATEWAY_PORT")?.unwrap_or(5000);
        let env_storage =
            env::var("GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/gateway.db".into());
        let env_credentials = env::var("GATEWAY_CREDENTIALS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/credentials.json"));
        let env_public_url =
            env::var("GATEWAY_PUBLIC_URL").unwrap_or_else(|_| "http://localhost:5000".into());
        let env_page_size = env_parse::<usize>("GATEWAY_PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE);
        let chunk_size = env_parse::<u64>("GATEWAY_CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE);
        let env_short_page_stop = env_parse::<bool>("GATEWAY_SHORT_PAGE_STOP")?.unwrap_or(false);

        // --- Merge ---
        let settings = GatewaySettings {
            page_size: args.page_size.unwrap_or(env_page_size),
            dt_pattern: env::var("GATEWAY_DT_PATTERN")
                .unwrap_or_else(|_| DEFAULT_DT_PATTERN.to_string()),
            chunk_size,
            short_page_stop: args.short_page_stop || env_short_page_stop,
        };
        if settings.page_size == 0 {
            bail!("page size must be at least 1");
        }
        if settings.chunk_size == 0 {
            bail!("GATEWAY_CHUNK_SIZE must be at least 1");
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            credentials_path: args.credentials.unwrap_or(env_credentials),
            credentials_content: env::var("GATEWAY_CREDENTIALS_CONTENT").ok(),
            public_url: args.public_url.unwrap_or(env_public_url),
            log_level: env::var("GATEWAY_LOG_LEVEL").ok(),
            settings,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
