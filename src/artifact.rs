//! Without a registry record (e.g. after a restart) the lookup falls back to
//! scanning the temp root for the job's `yt_download_<id>` directory.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::registry::{JobId, JobRegistry, JobStatus};

pub const WORKING_DIR_PREFIX: &str = "yt_download_";
pub const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "webm", "ogg", "wav"];
pub const ARTIFACT_EXTENSION: &str = "mp3";
pub const ARTIFACT_CONTENT_TYPE: &str = "audio/mpeg";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("job has not completed yet")]
    NotReady,
    #[error("artifact not found or expired")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPath {
    Registry,
    DirectoryScan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub directory: PathBuf,
    pub download_name: String,
    pub content_type: &'static str,
    pub found_via: LookupPath,
}

impl Artifact {
    fn new(id: &JobId, path: PathBuf, directory: PathBuf, found_via: LookupPath) -> Self {
        Self {
            path,
            directory,
            download_name: format!("{id}.{ARTIFACT_EXTENSION}"),
            content_type: ARTIFACT_CONTENT_TYPE,
            found_via,
        }
    }
}

pub fn working_dir_for(temp_root: &Path, id: &JobId) -> PathBuf {
    temp_root.join(format!("{WORKING_DIR_PREFIX}{id}"))
}

pub async fn locate(
    registry: &JobRegistry,
    temp_root: &Path,
    id: &JobId,
) -> Result<Artifact, ArtifactError> {
    if let Some(record) = registry.get(id) {
        if record.status != JobStatus::Completed {
            return Err(ArtifactError::NotReady);
        }

        if let Some(path) = find_in_job_dir(&record.working_dir, id).await? {
            let directory = record.working_dir;
            return Ok(Artifact::new(id, path, directory, LookupPath::Registry));
        }

        debug!(job_id = %id, "no file in the job directory, scanning temp root");
    }

    match scan_temp_root(temp_root, id).await? {
        Some((directory, path)) => {
            warn!(job_id = %id, ?path, "artifact located by temp root scan");
            Ok(Artifact::new(id, path, directory, LookupPath::DirectoryScan))
        }
        None => Err(ArtifactError::NotFound),
    }
}

async fn find_in_job_dir(job_dir: &Path, id: &JobId) -> Result<Option<PathBuf>, ArtifactError> {
    let Some(canonical_dir) = canonicalize_dir(job_dir).await? else {
        return Ok(None);
    };
    let prefix = format!("{id}.");

    let mut candidates = Vec::new();
    for path in list_dir(job_dir).await? {
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&prefix));
        if matches && let Some(valid) = resolve_candidate(&canonical_dir, &path).await? {
            candidates.push(valid);
        }
    }

    candidates.sort_by(|a, b| {
        extension_rank(a)
            .cmp(&extension_rank(b))
            .then_with(|| a.cmp(b))
    });
    Ok(candidates.into_iter().next())
}

async fn scan_temp_root(
    temp_root: &Path,
    id: &JobId,
) -> Result<Option<(PathBuf, PathBuf)>, ArtifactError> {
    let prefix = format!("{WORKING_DIR_PREFIX}{id}");
    let mut directories = Vec::new();
    for path in list_dir(temp_root).await? {
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&prefix));
        if matches && tokio::fs::metadata(&path).await.is_ok_and(|meta| meta.is_dir()) {
            directories.push(path);
        }
    }
    directories.sort();

    for directory in directories {
        let Some(canonical_dir) = canonicalize_dir(&directory).await? else {
            continue;
        };
        let mut files = list_dir(&directory).await?;
        files.sort();

        for extension in AUDIO_EXTENSIONS {
            for path in &files {
                if !has_extension(path, extension) {
                    continue;
                }
                if let Some(valid) = resolve_candidate(&canonical_dir, path).await? {
                    return Ok(Some((directory, valid)));
                }
            }
        }
    }

    Ok(None)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn extension_rank(path: &Path) -> usize {
    AUDIO_EXTENSIONS
        .iter()
        .position(|extension| has_extension(path, extension))
        .unwrap_or(AUDIO_EXTENSIONS.len())
}

async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    Ok(paths)
}

async fn canonicalize_dir(dir: &Path) -> Result<Option<PathBuf>, ArtifactError> {
    match tokio::fs::canonicalize(dir).await {
        Ok(path) => Ok(Some(path)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

async fn resolve_candidate(
    canonical_dir: &Path,
    candidate: &Path,
) -> Result<Option<PathBuf>, ArtifactError> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical = match tokio::fs::canonicalize(candidate).await {
        Ok(path) => path,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    if !canonical.starts_with(canonical_dir) {
        warn!(?canonical, "ignoring file outside its job directory");
        return Ok(None);
    }

    Ok(Some(canonical))
}
