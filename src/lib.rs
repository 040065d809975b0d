use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod options;
pub mod segmenter;
pub mod server;
pub mod storage;
pub mod v1;
pub mod watchdog;

pub use config::ServiceConfig;
pub use error::{Envelope, SegmentError, SegmentResult};
pub use options::SegmentOptions;
pub use segmenter::{CliSegmenter, Segmenter};
pub use watchdog::{TerminationHandle, TerminationReason, Watchdog};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub segmenter: Arc<dyn Segmenter>,
    pub watchdog: Watchdog,
    pub http: reqwest::Client,
    pub active_jobs: Arc<AtomicUsize>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServiceConfig, segmenter: Arc<dyn Segmenter>) -> (Self, TerminationHandle) {
        let (watchdog, termination) = Watchdog::new(
            config.timeout(),
            config.kill_delay(),
            config.recycle_after_request(),
        );
        let state = Self {
            config: Arc::new(config),
            segmenter,
            watchdog,
            http: reqwest::Client::new(),
            active_jobs: Arc::new(AtomicUsize::new(0)),
            started_at: Utc::now(),
        };
        (state, termination)
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::Relaxed)
    }

    /// Count a job as active until the returned guard is dropped.
    pub(crate) fn track_job(&self) -> JobGuard {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
        JobGuard {
            counter: Arc::clone(&self.active_jobs),
        }
    }
}

pub(crate) struct JobGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(v1::health_check))
        .route("/segment_file", post(v1::segment_file))
        .route("/segment_url", post(v1::segment_url))
        .route("/segment_input", post(v1::segment_input))
        .route("/segment_path", post(v1::segment_input))
        // volumes routinely exceed axum's 2 MB default
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
