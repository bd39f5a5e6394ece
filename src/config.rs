use std::{path::PathBuf, time::Duration};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5001";
pub const DEFAULT_YT_DLP_PATH: &str = "yt-dlp";
pub const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 10 * 60;
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 5;
pub const ARTIFACT_CLEANUP_DELAY_SECONDS: u64 = 5 * 60;
pub const SWEEP_RETENTION_SECONDS: u64 = 60 * 60;
pub const STALE_DIR_SECONDS: u64 = 2 * 60 * 60;
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] =
    ["http://localhost:5173", "http://127.0.0.1:5173"];

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub temp_root: PathBuf,
    pub yt_dlp_path: PathBuf,
    pub yt_dlp_timeout: Duration,
    pub max_concurrent_downloads: usize,
    pub artifact_cleanup_delay: Duration,
    pub sweep_retention: Duration,
    pub sweep_remove_directories: bool,
    pub sweep_interval: Option<Duration>,
    pub stale_dir_age: Duration,
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            temp_root: std::env::temp_dir(),
            yt_dlp_path: PathBuf::from(DEFAULT_YT_DLP_PATH),
            yt_dlp_timeout: Duration::from_secs(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            artifact_cleanup_delay: Duration::from_secs(ARTIFACT_CLEANUP_DELAY_SECONDS),
            sweep_retention: Duration::from_secs(SWEEP_RETENTION_SECONDS),
            sweep_remove_directories: false,
            sweep_interval: None,
            stale_dir_age: Duration::from_secs(STALE_DIR_SECONDS),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read_secs = |name: &str| read_u64(&lookup, name).map(Duration::from_secs);

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.allowed_origins);

        Self {
            bind_addr: resolve_bind_addr(&lookup),
            temp_root: lookup("TEMP_DIR")
                .and_then(|value| non_empty(&value).map(PathBuf::from))
                .unwrap_or(defaults.temp_root),
            yt_dlp_path: lookup("YT_DLP_PATH")
                .and_then(|value| non_empty(&value).map(PathBuf::from))
                .unwrap_or(defaults.yt_dlp_path),
            yt_dlp_timeout: read_secs("YT_DLP_TIMEOUT_SECONDS")
                .filter(|value| !value.is_zero())
                .unwrap_or(defaults.yt_dlp_timeout),
            max_concurrent_downloads: read_u64(&lookup, "MAX_CONCURRENT_DOWNLOADS")
                .and_then(|value| usize::try_from(value).ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_concurrent_downloads),
            artifact_cleanup_delay: read_secs("ARTIFACT_CLEANUP_DELAY_SECONDS")
                .unwrap_or(defaults.artifact_cleanup_delay),
            sweep_retention: read_secs("SWEEP_RETENTION_SECONDS")
                .unwrap_or(defaults.sweep_retention),
            sweep_remove_directories: read_bool(&lookup, "SWEEP_REMOVE_DIRECTORIES")
                .unwrap_or(defaults.sweep_remove_directories),
            sweep_interval: read_secs("SWEEP_INTERVAL_SECONDS").filter(|value| !value.is_zero()),
            stale_dir_age: read_secs("STALE_DIR_SECONDS").unwrap_or(defaults.stale_dir_age),
            allowed_origins,
        }
    }
}

fn read_bool<F>(lookup: &F, name: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_u64<F>(lookup: &F, name: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|value| value.trim().parse::<u64>().ok())
}

fn resolve_bind_addr<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(configured) =
        lookup("APP_ADDR").and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = lookup("PORT").and_then(|value| value.trim().parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
