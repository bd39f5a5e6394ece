#![allow(dead_code)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use audio_jobs::{
    Config, EngineError, EngineEvent, ExtractionEngine, ExtractionRequest, JobId, JobRecord,
    JobService, MediaInfo,
};
use tokio::sync::Notify;

/// Stand-in for yt-dlp: emits a few progress ticks, then writes `payload` as
/// `<id>.mp3` next to the output template, or fails with `failure`.
pub struct MockEngine {
    pub payload: Vec<u8>,
    pub failure: Option<String>,
    pub gate: Option<Arc<Notify>>,
}

impl MockEngine {
    pub fn succeeding(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            failure: None,
            gate: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            payload: Vec::new(),
            failure: Some(message.to_string()),
            gate: None,
        }
    }

    pub fn gated(payload: &[u8], gate: Arc<Notify>) -> Self {
        Self {
            payload: payload.to_vec(),
            failure: None,
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl ExtractionEngine for MockEngine {
    async fn probe(&self, url: &str) -> Result<MediaInfo, EngineError> {
        if url.contains("missing") {
            return Err(EngineError::Failed("ERROR: HTTP Error 404: Not Found".to_string()));
        }
        Ok(MediaInfo {
            title: "Mock Song".to_string(),
            duration: 180.0,
            uploader: "Mock Artist".to_string(),
            thumbnail: "https://example.com/thumb.jpg".to_string(),
            view_count: 42,
            upload_date: "20240101".to_string(),
        })
    }

    async fn extract(
        &self,
        request: &ExtractionRequest,
        progress: &(dyn Fn(EngineEvent) + Send + Sync),
    ) -> Result<(), EngineError> {
        for downloaded in [0u64, 25, 50, 75, 100] {
            progress(EngineEvent::Downloading {
                downloaded_bytes: Some(downloaded),
                total_bytes: Some(100),
                percent: None,
                speed: Some("1.0MiB/s".to_string()),
                eta: Some("00:01".to_string()),
            });
            tokio::task::yield_now().await;
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(message) = &self.failure {
            return Err(EngineError::Failed(message.clone()));
        }

        progress(EngineEvent::StageFinished {
            filename: Some(request.output_template.replace("%(ext)s", "webm").into()),
        });
        tokio::fs::write(request.output_template.replace("%(ext)s", "mp3"), &self.payload).await?;
        Ok(())
    }
}

pub fn test_config(temp_root: &std::path::Path) -> Config {
    Config {
        temp_root: temp_root.to_path_buf(),
        ..Config::default()
    }
}

pub fn service(config: Config, engine: MockEngine) -> JobService {
    JobService::new(config, Arc::new(engine))
}

pub async fn wait_for_terminal(jobs: &JobService, id: &JobId) -> Vec<JobRecord> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    loop {
        let record = jobs.progress(id).expect("job should stay registered");
        let terminal = record.status.is_terminal();
        seen.push(record);
        if terminal {
            return seen;
        }
        assert!(Instant::now() < deadline, "job {id} did not finish in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
