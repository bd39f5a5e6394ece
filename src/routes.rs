use std::{collections::HashSet, io::ErrorKind, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};
use url::Url;

use crate::{
    ApiError, JobService,
    cleanup::SweepReport,
    engine::MediaInfo,
    registry::{JobId, JobRecord},
};

const HEALTH_MESSAGE: &str = "Audio download API is running";

#[derive(Debug, Deserialize)]
struct UrlPayload {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: bool,
    job_id: JobId,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct MediaInfoResponse {
    success: bool,
    #[serde(flatten)]
    info: MediaInfo,
}

#[derive(Debug, Serialize)]
struct ProgressResponse {
    success: bool,
    progress: JobRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    success: bool,
    message: &'static str,
    active_job_count: usize,
}

#[derive(Debug, Serialize)]
struct SweepResponse {
    success: bool,
    #[serde(flatten)]
    report: SweepReport,
}

pub fn build_router(jobs: JobService) -> Result<Router, ApiError> {
    let cors = build_cors_layer(&jobs.config().allowed_origins)?;

    Ok(Router::new()
        .route("/api/health", get(health))
        .route("/api/video-info", get(video_info_query).post(video_info_body))
        .route("/api/download", post(start_download))
        .route("/api/download/{job_id}", get(download_artifact))
        .route("/api/progress/{job_id}", get(get_progress))
        .route("/api/cleanup", post(sweep))
        .with_state(jobs)
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

async fn health(State(jobs): State<JobService>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: HEALTH_MESSAGE,
        active_job_count: jobs.active_job_count(),
    })
}

async fn start_download(
    State(jobs): State<JobService>,
    payload: Result<Json<UrlPayload>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let job_id = jobs.submit(payload.url.as_deref().unwrap_or_default()).await?;

    Ok(Json(SubmitResponse {
        success: true,
        job_id,
        message: "Download started",
    }))
}

async fn video_info_query(
    State(jobs): State<JobService>,
    payload: Result<Query<UrlPayload>, QueryRejection>,
) -> Result<Json<MediaInfoResponse>, ApiError> {
    let Query(payload) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    probe(&jobs, payload).await
}

async fn video_info_body(
    State(jobs): State<JobService>,
    payload: Result<Json<UrlPayload>, JsonRejection>,
) -> Result<Json<MediaInfoResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    probe(&jobs, payload).await
}

async fn probe(jobs: &JobService, payload: UrlPayload) -> Result<Json<MediaInfoResponse>, ApiError> {
    let info = jobs.probe(payload.url.as_deref().unwrap_or_default()).await?;
    Ok(Json(MediaInfoResponse {
        success: true,
        info,
    }))
}

async fn get_progress(
    State(jobs): State<JobService>,
    Path(job_id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let progress = parse_job_id(&job_id)
        .and_then(|id| jobs.progress(&id))
        .ok_or_else(|| ApiError::not_found("Download not found"))?;

    Ok(Json(ProgressResponse {
        success: true,
        progress,
    }))
}

async fn download_artifact(
    State(jobs): State<JobService>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&job_id)
        .ok_or_else(|| ApiError::not_found("Downloaded file not found or expired"))?;
    let artifact = jobs.take_artifact(&id).await?;

    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("Downloaded file not found or expired"));
        }
        Err(error) => return Err(ApiError::internal(format!("could not open artifact: {error}"))),
    };
    let content_length = file
        .metadata()
        .await
        .map_err(|error| ApiError::internal(format!("could not read artifact metadata: {error}")))?
        .len();

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(artifact.content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&artifact.download_name))
            .map_err(|error| ApiError::internal(format!("invalid download header: {error}")))?,
    );

    info!(job_id = %id, bytes = content_length, "streaming artifact");
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

async fn sweep(State(jobs): State<JobService>) -> Json<SweepResponse> {
    Json(SweepResponse {
        success: true,
        report: jobs.sweep().await,
    })
}

fn parse_job_id(value: &str) -> Option<JobId> {
    value.parse().ok()
}

fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, ApiError> {
    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "invalid origin in ALLOWED_ORIGINS: {origin}; expected values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_' | ' ') {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.mp3".to_string()
    } else {
        compact.to_string()
    }
}
