use anyhow::{Context, Result};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TOKEN_DIR: &str = ".rateit";
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AUTHORITY_ADDR: &str = "0.0.0.0:5000";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub token_dir: PathBuf,
    pub debounce: Duration,
    pub http_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: load_or("RATEIT_API_URL", DEFAULT_API_URL.to_string())?,
            token_dir: PathBuf::from(load_or("RATEIT_TOKEN_DIR", DEFAULT_TOKEN_DIR.to_string())?),
            debounce: Duration::from_millis(load_or("RATEIT_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?),
            http_timeout: Duration::from_secs(load_or(
                "RATEIT_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token_dir: PathBuf::from(DEFAULT_TOKEN_DIR),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub addr: SocketAddr,
    pub token_secret: String,
    pub seed_file: Option<PathBuf>,
}

impl AuthorityConfig {
    pub fn from_env() -> Result<Self> {
        let addr = load_or("RATEIT_AUTHORITY_ADDR", DEFAULT_AUTHORITY_ADDR.parse::<SocketAddr>()?)?;
        let token_secret = env::var("RATEIT_TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("RATEIT_TOKEN_SECRET must be set"))?;
        let seed_file = env::var("RATEIT_SEED_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        Ok(Self {
            addr,
            token_secret,
            seed_file,
        })
    }
}

fn load_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            debug!("{} set from environment", key);
            raw.trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
        }
        _ => {
            info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
