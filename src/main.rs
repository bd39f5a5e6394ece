use std::sync::Arc;

use audio_jobs::{
    ApiError, Config, JobService, build_router, cleanup::purge_stale_working_dirs,
    ytdlp::YtDlpEngine,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "audio_jobs=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.temp_root)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "could not create temp root {:?}: {error}",
                config.temp_root
            ))
        })?;
    purge_stale_working_dirs(&config.temp_root, config.stale_dir_age).await;

    if config.sweep_remove_directories {
        info!("sweep will also delete working directories of removed jobs");
    } else {
        warn!(
            "SWEEP_REMOVE_DIRECTORIES=false: never-fetched job directories are only reclaimed \
             at startup"
        );
    }

    let engine = Arc::new(YtDlpEngine::new(
        config.yt_dlp_path.clone(),
        config.yt_dlp_timeout,
    ));
    let addr = config.bind_addr.clone();
    let jobs = JobService::new(config, engine);
    jobs.spawn_periodic_sweep();

    let app = build_router(jobs)?;
    let listener = TcpListener::bind(&addr).await.map_err(|error| {
        ApiError::internal(format!("could not bind {addr}: {error}"))
    })?;

    info!("backend ready on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
