use tracing::{debug, info, warn};

use crate::{
    classify::{ErrorKind, classify_error},
    engine::{EngineError, EngineEvent, ExtractionEngine, ExtractionRequest},
    registry::{JobId, JobRegistry},
};

pub async fn run_extraction(
    registry: &JobRegistry,
    engine: &dyn ExtractionEngine,
    id: JobId,
    request: ExtractionRequest,
) {
    let on_event = |event: EngineEvent| apply_event(registry, &id, event);

    match engine.extract(&request, &on_event).await {
        Ok(()) => {
            if registry.update(&id, |record| record.mark_completed()) == Some(true) {
                info!(job_id = %id, "extraction completed");
            }
        }
        Err(error) => {
            let raw = error.to_string();
            let (kind, message) = match error {
                EngineError::TimedOut(_) => (ErrorKind::Network, ErrorKind::Network.message(&raw)),
                _ => classify_error(&raw),
            };
            warn!(job_id = %id, ?kind, "extraction failed: {raw}");
            registry.update(&id, |record| record.mark_failed(kind, message));
        }
    }
}

pub fn apply_event(registry: &JobRegistry, id: &JobId, event: EngineEvent) {
    let percent = event.download_percent();
    match event {
        EngineEvent::Downloading { speed, eta, .. } => {
            let percent = percent.unwrap_or_default();
            registry.update(id, |record| record.record_download(percent, speed, eta));
        }
        EngineEvent::StageFinished { filename } => {
            let filename = filename
                .as_deref()
                .and_then(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned());
            debug!(job_id = %id, ?filename, "download stage finished");
            registry.update(id, |record| record.mark_finished(filename));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        engine::MediaInfo,
        registry::{JobRecord, JobStatus},
    };

    struct ScriptedEngine {
        events: Vec<EngineEvent>,
        failure: Option<&'static str>,
        timed_out: bool,
    }

    #[async_trait]
    impl ExtractionEngine for ScriptedEngine {
        async fn probe(&self, _url: &str) -> Result<MediaInfo, EngineError> {
            Ok(MediaInfo::default())
        }

        async fn extract(
            &self,
            _request: &ExtractionRequest,
            progress: &(dyn Fn(EngineEvent) + Send + Sync),
        ) -> Result<(), EngineError> {
            for event in &self.events {
                progress(event.clone());
            }
            if self.timed_out {
                return Err(EngineError::TimedOut(600));
            }
            match self.failure {
                Some(message) => Err(EngineError::Failed(message.to_string())),
                None => Ok(()),
            }
        }
    }

    fn tick(downloaded: u64, total: u64) -> EngineEvent {
        EngineEvent::Downloading {
            downloaded_bytes: Some(downloaded),
            total_bytes: Some(total),
            percent: None,
            speed: Some("2MiB/s".to_string()),
            eta: Some("00:01".to_string()),
        }
    }

    fn setup() -> (JobRegistry, JobId, ExtractionRequest) {
        let registry = JobRegistry::new();
        let id = JobId::new();
        let dir = PathBuf::from("/tmp/yt_download_worker");
        registry.put(id, JobRecord::new(dir.clone()));
        let request = ExtractionRequest::audio("https://example.com/v", &dir, &id.to_string());
        (registry, id, request)
    }

    #[tokio::test]
    async fn successful_run_completes_the_job() {
        let (registry, id, request) = setup();
        let engine = ScriptedEngine {
            events: vec![
                tick(10, 100),
                tick(100, 100),
                EngineEvent::StageFinished {
                    filename: Some(PathBuf::from("/tmp/yt_download_worker/x.webm")),
                },
            ],
            failure: None,
            timed_out: false,
        };

        run_extraction(&registry, &engine, id, request).await;

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100.0);
        assert_eq!(record.filename.as_deref(), Some("x.webm"));
    }

    #[tokio::test]
    async fn full_byte_count_is_capped_until_finished() {
        let (registry, id, _) = setup();
        apply_event(&registry, &id, tick(100, 100));
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Downloading);
        assert_eq!(record.progress, 99.0);
        assert_eq!(record.speed.as_deref(), Some("2MiB/s"));
    }

    #[tokio::test]
    async fn failure_is_classified_into_the_record() {
        let (registry, id, request) = setup();
        let engine = ScriptedEngine {
            events: vec![tick(30, 100)],
            failure: Some("ERROR: unable to download: HTTP Error 403: Forbidden"),
            timed_out: false,
        };

        run_extraction(&registry, &engine, id, request).await;

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_kind, Some(ErrorKind::Blocked));
        assert_eq!(record.progress, 30.0);
        assert!(record.error.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn worker_tolerates_a_deleted_record() {
        let (registry, id, request) = setup();
        registry.delete(&id);
        let engine = ScriptedEngine {
            events: vec![tick(1, 2)],
            failure: None,
            timed_out: false,
        };

        run_extraction(&registry, &engine, id, request).await;
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn engine_timeout_is_reported_as_network_error() {
        let (registry, id, request) = setup();
        let engine = ScriptedEngine {
            events: vec![tick(40, 100)],
            failure: None,
            timed_out: true,
        };

        run_extraction(&registry, &engine, id, request).await;

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_kind, Some(ErrorKind::Network));
        assert_eq!(record.error, Some(ErrorKind::Network.message("")));
        assert_eq!(record.progress, 40.0);
    }
}
