use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// External base URL for signed upload links and fallback share links.
    pub public_url: String,
    /// HMAC key for upload URLs. `None` means generate one at startup.
    pub signing_secret: Option<String>,
    pub upload_url_ttl_secs: u64,
    /// `0` disables the background sweeper.
    pub sweep_interval_secs: u64,
    /// `0` disables orphaned-blob reclamation.
    pub orphan_grace_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Anonymous file sharing with expiring links")]
pub struct Args {
    /// Host to bind to (overrides DROPSHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DROPSHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides DROPSHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DROPSHARE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL, e.g. https://share.example.com (overrides DROPSHARE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Seconds between background sweeps, 0 to disable (overrides DROPSHARE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("DROPSHARE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("DROPSHARE_PORT", 3000u16)?;
        let env_storage =
            env::var("DROPSHARE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("DROPSHARE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/dropshare.db".into());
        let env_sweep = env_number("DROPSHARE_SWEEP_INTERVAL_SECS", 300u64)?;

        // --- Merge ---
        let port = args.port.unwrap_or(env_port);
        let public_url = args
            .public_url
            .or_else(|| env::var("DROPSHARE_PUBLIC_URL").ok())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_url,
            signing_secret: env::var("DROPSHARE_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            upload_url_ttl_secs: env_number("DROPSHARE_UPLOAD_URL_TTL_SECS", 900)?,
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep),
            orphan_grace_secs: env_number("DROPSHARE_ORPHAN_GRACE_SECS", 86_400)?,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Copy safe to log: the signing secret is masked.
    pub fn redacted(&self) -> Self {
        Self {
            signing_secret: self.signing_secret.as_ref().map(|_| "<redacted>".into()),
            ..self.clone()
        }
    }
}

/// Read a numeric variable, falling back to `default` when it is unset.
fn env_number<T>(name: &str, default: T) -> Result<T>
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
