//! In-memory job registry.
//!
//! The outer map is only write-locked to insert or remove entries; every
//! record sits behind its own lock, so updates to different jobs never wait on
//! each other and readers always get a fully written snapshot.

use std::{collections::HashMap, fmt, path::PathBuf, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::classify::ErrorKind;

pub const MAX_IN_FLIGHT_PROGRESS: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Downloading,
    Finished,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub status: JobStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip)]
    pub working_dir: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub cleanup_scheduled: bool,
}

impl JobRecord {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            status: JobStatus::Started,
            progress: 0.0,
            speed: None,
            eta: None,
            error: None,
            error_kind: None,
            filename: None,
            working_dir,
            created_at: Some(Utc::now()),
            cleanup_scheduled: false,
        }
    }

    pub fn record_download(
        &mut self,
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    ) -> bool {
        if !matches!(self.status, JobStatus::Started | JobStatus::Downloading) {
            return false;
        }

        let percent = if percent.is_finite() {
            percent.clamp(0.0, MAX_IN_FLIGHT_PROGRESS)
        } else {
            0.0
        };
        self.status = JobStatus::Downloading;
        self.progress = self.progress.max(percent);
        self.speed = speed;
        self.eta = eta;
        true
    }

    pub fn mark_finished(&mut self, filename: Option<String>) -> bool {
        if !matches!(
            self.status,
            JobStatus::Started | JobStatus::Downloading | JobStatus::Finished
        ) {
            return false;
        }

        self.status = JobStatus::Finished;
        self.progress = 100.0;
        if filename.is_some() {
            self.filename = filename;
        }
        true
    }

    pub fn mark_completed(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.status = JobStatus::Completed;
        self.progress = 100.0;
        true
    }

    /// Progress is left where it was so polled values stay non-decreasing.
    pub fn mark_failed(&mut self, kind: ErrorKind, message: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.status = JobStatus::Error;
        self.error_kind = Some(kind);
        self.error = Some(message);
        true
    }
}

type Slot = Arc<Mutex<JobRecord>>;

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Slot>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: JobId, record: JobRecord) {
        self.jobs.write().insert(id, Arc::new(Mutex::new(record)));
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        let slot = self.slot(id)?;
        let record = slot.lock().clone();
        Some(record)
    }

    pub fn update<F, R>(&self, id: &JobId, mutator: F) -> Option<R>
    where
        F: FnOnce(&mut JobRecord) -> R,
    {
        let slot = self.slot(id)?;
        let mut record = slot.lock();
        Some(mutator(&mut *record))
    }

    pub fn delete(&self, id: &JobId) -> Option<JobRecord> {
        let slot = self.jobs.write().remove(id)?;
        let record = slot.lock().clone();
        Some(record)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn retain<F>(&self, mut keep: F) -> Vec<(JobId, JobRecord)>
    where
        F: FnMut(&JobId, &mut JobRecord) -> bool,
    {
        let mut jobs = self.jobs.write();
        let mut removed = Vec::new();
        jobs.retain(|id, slot| {
            let mut record = slot.lock();
            if keep(id, &mut *record) {
                true
            } else {
                removed.push((*id, record.clone()));
                false
            }
        });
        removed
    }

    fn slot(&self, id: &JobId) -> Option<Slot> {
        self.jobs.read().get(id).cloned()
    }
}
