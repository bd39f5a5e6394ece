use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::{
    ApiError, Config,
    artifact::{self, Artifact, ArtifactError},
    classify::{ErrorKind as FailureKind, classify_error},
    cleanup::{self, CleanupScheduler, SweepReport},
    config::non_empty,
    engine::{EngineError, ExtractionEngine, ExtractionRequest, MediaInfo},
    registry::{JobId, JobRecord, JobRegistry},
    worker::run_extraction,
};

const MAX_ID_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct JobService {
    registry: Arc<JobRegistry>,
    engine: Arc<dyn ExtractionEngine>,
    config: Arc<Config>,
    permits: Arc<Semaphore>,
    cleanup: CleanupScheduler,
}

impl JobService {
    pub fn new(config: Config, engine: Arc<dyn ExtractionEngine>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let cleanup = CleanupScheduler::new(Arc::clone(&registry), config.artifact_cleanup_delay);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1)));

        Self {
            registry,
            engine,
            config: Arc::new(config),
            permits,
            cleanup,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active_job_count(&self) -> usize {
        self.registry.len()
    }

    pub async fn submit(&self, url: &str) -> Result<JobId, ApiError> {
        let url = non_empty(url)
            .ok_or_else(|| ApiError::bad_request("URL is required"))?
            .to_string();

        tokio::fs::create_dir_all(&self.config.temp_root)
            .await
            .map_err(|error| ApiError::internal(format!("could not create temp root: {error}")))?;
        let (id, working_dir) = self.allocate_working_dir().await?;

        self.registry.put(id, JobRecord::new(working_dir.clone()));
        info!(job_id = %id, %url, "job submitted");

        let request = ExtractionRequest::audio(url, &working_dir, &id.to_string());
        let service = self.clone();
        tokio::spawn(async move {
            let _permit = match Arc::clone(&service.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    service.registry.update(&id, |record| {
                        record.mark_failed(
                            FailureKind::Unclassified,
                            FailureKind::Unclassified.message("worker pool is shut down"),
                        )
                    });
                    return;
                }
            };
            run_extraction(&service.registry, service.engine.as_ref(), id, request).await;
        });

        Ok(id)
    }

    async fn allocate_working_dir(&self) -> Result<(JobId, PathBuf), ApiError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = JobId::new();
            let dir = artifact::working_dir_for(&self.config.temp_root, &id);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => return Ok((id, dir)),
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    warn!(?dir, "working directory already exists, drawing a new job id");
                }
                Err(error) => {
                    return Err(ApiError::internal(format!(
                        "could not create working directory {dir:?}: {error}"
                    )));
                }
            }
        }
        Err(ApiError::internal("could not allocate a unique job directory"))
    }

    pub async fn probe(&self, url: &str) -> Result<MediaInfo, ApiError> {
        let url = non_empty(url).ok_or_else(|| ApiError::bad_request("URL is required"))?;

        self.engine.probe(url).await.map_err(|error| match error {
            EngineError::Failed(raw) => {
                warn!(%url, "metadata probe failed: {raw}");
                ApiError::bad_request(classify_error(&raw).1)
            }
            timed_out @ EngineError::TimedOut(_) => ApiError::bad_request(timed_out.to_string()),
            other => ApiError::internal(other),
        })
    }

    pub fn progress(&self, id: &JobId) -> Option<JobRecord> {
        self.registry.get(id)
    }

    pub async fn take_artifact(&self, id: &JobId) -> Result<Artifact, ArtifactError> {
        let artifact = artifact::locate(&self.registry, &self.config.temp_root, id).await?;
        if self.cleanup.schedule(*id, artifact.directory.clone()) {
            info!(
                job_id = %id,
                delay_secs = self.config.artifact_cleanup_delay.as_secs(),
                "artifact served, cleanup scheduled"
            );
        }
        Ok(artifact)
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let removed = cleanup::sweep_registry(&self.registry, now, self.config.sweep_retention);

        if self.config.sweep_remove_directories {
            for (_, record) in &removed {
                cleanup::remove_working_dir(&record.working_dir).await;
            }
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "sweep removed stale jobs");
        }

        SweepReport {
            cleaned_up: removed.len(),
            active_job_count: self.registry.len(),
        }
    }

    pub fn spawn_periodic_sweep(&self) {
        let Some(interval) = self.config.sweep_interval else {
            return;
        };

        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.sweep().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::EngineEvent;

    struct IdleEngine;

    #[async_trait]
    impl ExtractionEngine for IdleEngine {
        async fn probe(&self, _url: &str) -> Result<MediaInfo, EngineError> {
            Ok(MediaInfo::default())
        }

        async fn extract(
            &self,
            _request: &ExtractionRequest,
            _progress: &(dyn Fn(EngineEvent) + Send + Sync),
        ) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn service_with_jobs(sweep_interval: Option<Duration>) -> (JobService, JobId, JobId) {
        let config = Config {
            sweep_interval,
            sweep_retention: Duration::ZERO,
            ..Config::default()
        };
        let jobs = JobService::new(config, Arc::new(IdleEngine));

        let done = JobId::new();
        let mut record = JobRecord::new(PathBuf::from("/nonexistent/done"));
        record.mark_completed();
        jobs.registry.put(done, record);

        let running = JobId::new();
        jobs.registry.put(running, JobRecord::new(PathBuf::from("/nonexistent/running")));
        (jobs, done, running)
    }

    #[tokio::test]
    async fn periodic_sweep_drops_stale_terminal_jobs() {
        let (jobs, done, running) = service_with_jobs(Some(Duration::from_millis(20)));
        jobs.spawn_periodic_sweep();

        for _ in 0..200 {
            if !jobs.registry.contains(&done) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!jobs.registry.contains(&done));
        assert!(jobs.registry.contains(&running));
    }

    #[tokio::test]
    async fn sweep_stays_manual_without_an_interval() {
        let (jobs, done, _) = service_with_jobs(None);
        jobs.spawn_periodic_sweep();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(jobs.registry.contains(&done));
    }
}
