pub mod artifact;
pub mod classify;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod routes;
pub mod service;
pub mod worker;
pub mod ytdlp;

pub use config::Config;
pub use engine::{EngineError, EngineEvent, ExtractionEngine, ExtractionRequest, MediaInfo};
pub use error::ApiError;
pub use registry::{JobId, JobRecord, JobRegistry, JobStatus};
pub use routes::build_router;
pub use service::JobService;
