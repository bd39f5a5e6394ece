use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

pub const AUDIO_FORMAT_PREFERENCE: &str =
    "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio/best[height<=720]";
pub const TARGET_AUDIO_CODEC: &str = "mp3";
pub const TARGET_AUDIO_BITRATE_KBPS: u32 = 192;
pub const REFERER: &str = "https://www.youtube.com/";

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const REQUEST_HEADERS: [(&str, &str); 7] = [
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Accept-Encoding", "gzip, deflate"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Upgrade-Insecure-Requests", "1"),
];

pub fn random_user_agent() -> &'static str {
    use rand::seq::SliceRandom;

    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub fn default_request_headers() -> Vec<(String, String)> {
    REQUEST_HEADERS
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub extractor_retries: u32,
    pub fragment_retries: u32,
    pub max_backoff_secs: u32,
    pub sleep_interval_secs: u32,
    pub max_sleep_interval_secs: u32,
    pub socket_timeout_secs: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            extractor_retries: 3,
            fragment_retries: 3,
            max_backoff_secs: 30,
            sleep_interval_secs: 1,
            max_sleep_interval_secs: 3,
            socket_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub url: String,
    pub output_template: String,
    pub format_preference: String,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
    pub retry: RetryPolicy,
    pub user_agent: String,
    pub referer: String,
    pub headers: Vec<(String, String)>,
}

impl ExtractionRequest {
    pub fn audio(url: impl Into<String>, working_dir: &std::path::Path, file_stem: &str) -> Self {
        let output_template = working_dir
            .join(format!("{file_stem}.%(ext)s"))
            .to_string_lossy()
            .into_owned();

        Self {
            url: url.into(),
            output_template,
            format_preference: AUDIO_FORMAT_PREFERENCE.to_string(),
            audio_codec: TARGET_AUDIO_CODEC.to_string(),
            audio_bitrate_kbps: TARGET_AUDIO_BITRATE_KBPS,
            retry: RetryPolicy::default(),
            user_agent: random_user_agent().to_string(),
            referer: REFERER.to_string(),
            headers: default_request_headers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Downloading {
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
        percent: Option<String>,
        speed: Option<String>,
        eta: Option<String>,
    },
    StageFinished { filename: Option<PathBuf> },
}

impl EngineEvent {
    /// Percentage for a download tick: byte counts when both are known,
    /// otherwise the engine's own percent string, otherwise zero.
    pub fn download_percent(&self) -> Option<f64> {
        let Self::Downloading {
            downloaded_bytes,
            total_bytes,
            percent,
            ..
        } = self
        else {
            return None;
        };

        if let (Some(downloaded), Some(total)) = (downloaded_bytes, total_bytes)
            && *total > 0
        {
            return Some(*downloaded as f64 / *total as f64 * 100.0);
        }

        Some(percent.as_deref().map_or(0.0, parse_percent))
    }
}

pub fn parse_percent(value: &str) -> f64 {
    value
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub title: String,
    pub duration: f64,
    pub uploader: String,
    pub thumbnail: String,
    pub view_count: u64,
    pub upload_date: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),
    #[error("extraction timed out after {0} seconds")]
    TimedOut(u64),
    #[error("extraction engine is not installed: {0}")]
    Missing(String),
    #[error("could not run extraction engine: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse engine output: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    async fn probe(&self, url: &str) -> Result<MediaInfo, EngineError>;

    async fn extract(
        &self,
        request: &ExtractionRequest,
        progress: &(dyn Fn(EngineEvent) + Send + Sync),
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
        percent: Option<&str>,
    ) -> EngineEvent {
        EngineEvent::Downloading {
            downloaded_bytes,
            total_bytes,
            percent: percent.map(ToString::to_string),
            speed: None,
            eta: None,
        }
    }

    #[test]
    fn byte_counts_take_precedence() {
        let event = tick(Some(250), Some(1000), Some("90%"));
        assert_eq!(event.download_percent(), Some(25.0));
    }

    #[test]
    fn percent_string_is_the_fallback() {
        assert_eq!(tick(None, Some(1000), Some(" 42.5%")).download_percent(), Some(42.5));
        assert_eq!(tick(Some(10), Some(0), Some("7%")).download_percent(), Some(7.0));
        assert_eq!(tick(None, None, Some("N/A")).download_percent(), Some(0.0));
        assert_eq!(tick(None, None, None).download_percent(), Some(0.0));
    }

    #[test]
    fn stage_finished_has_no_percent() {
        let event = EngineEvent::StageFinished { filename: None };
        assert_eq!(event.download_percent(), None);
    }

    #[test]
    fn audio_request_targets_the_working_dir() {
        let request = ExtractionRequest::audio(
            "https://youtu.be/x",
            std::path::Path::new("/tmp/yt_download_1"),
            "1",
        );
        assert_eq!(request.output_template, "/tmp/yt_download_1/1.%(ext)s");
        assert_eq!(request.audio_codec, "mp3");
        assert_eq!(request.audio_bitrate_kbps, 192);
        assert!(USER_AGENTS.contains(&request.user_agent.as_str()));
        assert_eq!(request.headers.len(), REQUEST_HEADERS.len());
    }
}
