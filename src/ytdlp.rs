use std::{io::ErrorKind, path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    time::timeout,
};
use tracing::{debug, warn};

use crate::engine::{
    EngineError, EngineEvent, ExtractionEngine, ExtractionRequest, MediaInfo, REFERER,
    RetryPolicy, default_request_headers, random_user_agent,
};

const PROGRESS_PREFIX: &str = "JOB_PROGRESS|";
const PROGRESS_TEMPLATE: &str = "download:JOB_PROGRESS|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s|%(progress.filename)s";
const FALLBACK_ERROR: &str = "yt-dlp could not complete the operation";

#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary: PathBuf,
    timeout: Duration,
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, error: std::io::Error) -> EngineError {
        if error.kind() == ErrorKind::NotFound {
            EngineError::Missing(self.binary.to_string_lossy().into_owned())
        } else {
            EngineError::Io(error)
        }
    }
}

#[async_trait]
impl ExtractionEngine for YtDlpEngine {
    async fn probe(&self, url: &str) -> Result<MediaInfo, EngineError> {
        let output = timeout(
            self.timeout,
            self.command().args(build_probe_args(url)).output(),
        )
        .await
        .map_err(|_| EngineError::TimedOut(self.timeout.as_secs()))?
        .map_err(|error| self.spawn_error(error))?;

        if !output.status.success() {
            return Err(EngineError::Failed(error_message(&output.stderr)));
        }

        let info: YtDlpVideoInfo = serde_json::from_slice(&output.stdout)?;
        Ok(info.into())
    }

    async fn extract(
        &self,
        request: &ExtractionRequest,
        progress: &(dyn Fn(EngineEvent) + Send + Sync),
    ) -> Result<(), EngineError> {
        let mut child = self
            .command()
            .args(build_download_args(request))
            .spawn()
            .map_err(|error| self.spawn_error(error))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Failed("could not capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Failed("could not capture yt-dlp stderr".to_string()))?;
        let stderr_task = tokio::spawn(collect_stderr(stderr));

        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match parse_progress_line(&line) {
                    Some(event) => progress(event),
                    None => debug!("yt-dlp: {line}"),
                }
            }
            child.wait().await
        };

        let outcome = timeout(self.timeout, run).await;
        let status = match outcome {
            Ok(status) => status?,
            Err(_) => {
                if let Err(error) = child.start_kill() {
                    warn!("could not kill timed out yt-dlp process: {error}");
                }
                stderr_task.abort();
                return Err(EngineError::TimedOut(self.timeout.as_secs()));
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Failed(error_message(&stderr)))
        }
    }
}

async fn collect_stderr<R>(stderr: R) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                collected.extend_from_slice(line.as_bytes());
                collected.push(b'\n');
            }
            Ok(None) => break,
            Err(error) => {
                warn!("could not read yt-dlp stderr: {error}");
                break;
            }
        }
    }
    collected
}

/// Picks the most useful line from yt-dlp's stderr: the last `ERROR:` line,
/// otherwise the last non-empty one.
pub fn error_message(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();

    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map_or_else(|| FALLBACK_ERROR.to_string(), ToString::to_string)
}

pub fn parse_progress_line(line: &str) -> Option<EngineEvent> {
    let payload = line.trim_end_matches(['\r', '\n']).strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = payload.splitn(7, '|');
    let status = fields.next()?.trim();
    let downloaded_bytes = fields.next().and_then(parse_count);
    let total_bytes = fields.next().and_then(parse_count);
    let percent = fields.next().and_then(present);
    let speed = fields.next().and_then(present);
    let eta = fields.next().and_then(present);
    let filename = fields.next().and_then(present).map(PathBuf::from);

    match status {
        "downloading" => Some(EngineEvent::Downloading {
            downloaded_bytes,
            total_bytes,
            percent,
            speed,
            eta,
        }),
        "finished" => Some(EngineEvent::StageFinished { filename }),
        _ => None,
    }
}

fn present(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || matches!(value, "NA" | "N/A" | "None" | "Unknown") {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_count(value: &str) -> Option<u64> {
    let value = value.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|count| count.is_finite() && *count >= 0.0)
            .map(|count| count as u64)
    })
}

fn push_network_args(
    args: &mut Vec<String>,
    user_agent: &str,
    referer: &str,
    headers: &[(String, String)],
) {
    args.push("--user-agent".to_string());
    args.push(user_agent.to_string());
    args.push("--referer".to_string());
    args.push(referer.to_string());
    for (name, value) in headers {
        args.push("--add-header".to_string());
        args.push(format!("{name}:{value}"));
    }
}

fn push_retry_args(args: &mut Vec<String>, retry: &RetryPolicy) {
    let pairs = [
        ("--retries", retry.retries.to_string()),
        ("--extractor-retries", retry.extractor_retries.to_string()),
        ("--fragment-retries", retry.fragment_retries.to_string()),
        ("--retry-sleep", format!("http:exp=1:{}", retry.max_backoff_secs)),
        ("--retry-sleep", format!("fragment:exp=1:{}", retry.max_backoff_secs)),
        ("--sleep-interval", retry.sleep_interval_secs.to_string()),
        ("--max-sleep-interval", retry.max_sleep_interval_secs.to_string()),
        ("--socket-timeout", retry.socket_timeout_secs.to_string()),
    ];
    for (flag, value) in pairs {
        args.push(flag.to_string());
        args.push(value);
    }
}

pub fn build_download_args(request: &ExtractionRequest) -> Vec<String> {
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--quiet".to_string(),
        "--progress".to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "-f".to_string(),
        request.format_preference.clone(),
        "-x".to_string(),
        "--audio-format".to_string(),
        request.audio_codec.clone(),
        "--audio-quality".to_string(),
        format!("{}K", request.audio_bitrate_kbps),
        "-o".to_string(),
        request.output_template.clone(),
    ];

    push_network_args(&mut args, &request.user_agent, &request.referer, &request.headers);
    push_retry_args(&mut args, &request.retry);

    args.push("--".to_string());
    args.push(request.url.clone());
    args
}

pub fn build_probe_args(url: &str) -> Vec<String> {
    let mut args = vec![
        "-J".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--skip-download".to_string(),
    ];

    push_network_args(&mut args, random_user_agent(), REFERER, &default_request_headers());
    let retry = RetryPolicy::default();
    args.push("--extractor-retries".to_string());
    args.push(retry.extractor_retries.to_string());
    args.push("--socket-timeout".to_string());
    args.push(retry.socket_timeout_secs.to_string());

    args.push("--".to_string());
    args.push(url.to_string());
    args
}

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    view_count: Option<u64>,
    upload_date: Option<String>,
}

impl From<YtDlpVideoInfo> for MediaInfo {
    fn from(info: YtDlpVideoInfo) -> Self {
        Self {
            title: info.title.unwrap_or_else(|| "Unknown".to_string()),
            duration: info.duration.unwrap_or_default(),
            uploader: info.uploader.unwrap_or_else(|| "Unknown".to_string()),
            thumbnail: info.thumbnail.unwrap_or_default(),
            view_count: info.view_count.unwrap_or_default(),
            upload_date: info.upload_date.unwrap_or_default(),
        }
    }
}
