use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    artifact::WORKING_DIR_PREFIX,
    registry::{JobId, JobRecord, JobRegistry},
};

#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    registry: Arc<JobRegistry>,
    delay: Duration,
    pending: Arc<Mutex<HashSet<PathBuf>>>,
}

impl CleanupScheduler {
    pub fn new(registry: Arc<JobRegistry>, delay: Duration) -> Self {
        Self {
            registry,
            delay,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn schedule(&self, id: JobId, directory: PathBuf) -> bool {
        if !self.pending.lock().insert(directory.clone()) {
            return false;
        }
        self.registry
            .update(&id, |record| record.cleanup_scheduled = true);

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.delay).await;
            remove_working_dir(&directory).await;
            if scheduler.registry.delete(&id).is_some() {
                info!(job_id = %id, "job cleaned up");
            }
            scheduler.pending.lock().remove(&directory);
        });
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

pub async fn remove_working_dir(directory: &Path) {
    match tokio::fs::remove_dir_all(directory).await {
        Ok(()) => debug!(?directory, "working directory removed"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => info!(?directory, "could not remove working directory: {error}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub cleaned_up: usize,
    pub active_job_count: usize,
}

pub fn sweep_registry(
    registry: &JobRegistry,
    now: DateTime<Utc>,
    retention: Duration,
) -> Vec<(JobId, JobRecord)> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);

    registry.retain(|_, record| {
        let created_at = *record.created_at.get_or_insert(now);
        let expired = now.signed_duration_since(created_at) > retention;
        !(expired && record.status.is_terminal())
    })
}

pub async fn purge_stale_working_dirs(temp_root: &Path, older_than: Duration) -> usize {
    if older_than.is_zero() {
        return 0;
    }

    let mut entries = match tokio::fs::read_dir(temp_root).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("could not open temp root for cleanup: {error}");
            }
            return 0;
        }
    };

    let now = std::time::SystemTime::now();
    let mut purged = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("could not iterate temp root for cleanup: {error}");
                break;
            }
        };

        let is_job_dir = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(WORKING_DIR_PREFIX));
        if !is_job_dir {
            continue;
        }

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_dir() => metadata,
            Ok(_) => continue,
            Err(error) => {
                warn!("could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => purged += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("could not remove stale directory {:?}: {error}", path),
        }
    }

    if purged > 0 {
        info!("purged {purged} stale working director(ies)");
    }
    purged
}
