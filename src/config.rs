//! Configuration for the monolith deployment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address {0}")]
    InvalidAddr(String),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: u16,
    /// Holds `uploads/`, `hls/` and `thumbnails/`
    pub data_dir: PathBuf,
    /// JSON snapshot of asset records
    pub db_path: PathBuf,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub max_concurrent_encodes: usize,
    pub max_queued_encodes: usize,
    pub encode_timeout: Duration,
    pub reconcile_interval: Duration,
    /// 1 disables retries
    pub max_encode_attempts: u32,
    pub hls_segment_seconds: u32,
    pub thumbnail_offset_secs: f64,
    pub max_upload_bytes: usize,
    /// Allowed CORS origin; any origin when unset
    pub client_url: Option<String>,
    pub admin_tokens: Vec<String>,
    pub subscriber_tokens: Vec<String>,
}

impl Config {
    /// Load configuration from `.env` and environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let data_dir = PathBuf::from(text("DATA_DIR", "./data"));
        let db_path = lookup("DB_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("assets.json"));

        Self {
            addr: text("ADDR", "127.0.0.1"),
            port: parsed(&lookup, "PORT", 5000),
            data_dir,
            db_path,
            ffmpeg_bin: text("FFMPEG_BIN", "ffmpeg"),
            ffprobe_bin: text("FFPROBE_BIN", "ffprobe"),
            max_concurrent_encodes: parsed::<usize, _>(&lookup, "MAX_CONCURRENT_ENCODES", 2).max(1),
            max_queued_encodes: parsed::<usize, _>(&lookup, "MAX_QUEUED_ENCODES", 16).max(1),
            encode_timeout: Duration::from_secs(
                parsed::<u64, _>(&lookup, "ENCODE_TIMEOUT_SECS", 7200).max(1),
            ),
            reconcile_interval: Duration::from_secs(
                parsed::<u64, _>(&lookup, "RECONCILE_INTERVAL_SECS", 300).max(1),
            ),
            max_encode_attempts: parsed::<u32, _>(&lookup, "MAX_ENCODE_ATTEMPTS", 1).max(1),
            hls_segment_seconds: parsed::<u32, _>(&lookup, "HLS_SEGMENT_SECONDS", 10).max(1),
            thumbnail_offset_secs: parsed(&lookup, "THUMBNAIL_OFFSET_SECS", 3.0),
            max_upload_bytes: parsed(&lookup, "MAX_UPLOAD_BYTES", 5 * 1024 * 1024 * 1024),
            client_url: lookup("CLIENT_URL").filter(|v| !v.trim().is_empty()),
            admin_tokens: token_list(lookup("ADMIN_TOKENS")),
            subscriber_tokens: token_list(lookup("SUBSCRIBER_TOKENS")),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.addr, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidAddr(raw))
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid config value, using default");
            default
        }),
        _ => default,
    }
}

fn token_list(raw: Option<String>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}
