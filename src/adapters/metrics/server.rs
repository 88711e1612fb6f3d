//! HTTP Server - Exposition, Scheduler Control and Probes
//!
//! Serves pull exposition (/metrics, /metrics/{job}), scheduler control
//! (/scheduler/...) and liveness/readiness probes (/live, /ready) via
//! axum 0.7. Readiness follows the scheduler state.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::error::{RegistryError, SchedulerError};
use crate::usecases::control::ControlApi;
use crate::usecases::scheduler::JobInfo;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Axum-based HTTP server over the control facade.
pub struct HttpServer {
    /// Operations served.
    control: ControlApi,
    /// Bind address (from `exporter.bind_address`).
    bind_address: String,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(control: ControlApi, bind_address: impl Into<String>) -> Self {
        Self {
            control,
            bind_address: bind_address.into(),
        }
    }

    /// Routes, exposed for in-process testing.
    pub fn router(control: ControlApi) -> Router {
        Router::new()
            .route("/metrics", get(Self::aggregate_metrics))
            .route("/metrics/:job", get(Self::job_metrics))
            .route("/scheduler", get(Self::scheduler_info))
            .route("/scheduler/jobs", get(Self::list_jobs))
            .route("/scheduler/jobs/:job", get(Self::get_job))
            .route("/scheduler/jobs/:job/pause", get(Self::pause_job))
            .route("/scheduler/jobs/:job/resume", get(Self::resume_job))
            .route("/scheduler/jobs/:job/run", get(Self::run_job))
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(control)
    }

    /// Serve until shutdown.
    #[instrument(skip(self, shutdown_rx), fields(address = %self.bind_address))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Self::router(self.control);

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        info!(address = %self.bind_address, "HTTP server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    async fn aggregate_metrics(State(control): State<ControlApi>) -> Response {
        exposition(control.aggregate_metrics())
    }

    async fn job_metrics(State(control): State<ControlApi>, Path(job): Path<String>) -> Response {
        exposition(control.job_metrics(&job))
    }

    async fn scheduler_info(State(control): State<ControlApi>) -> Response {
        Json(control.scheduler_info()).into_response()
    }

    async fn list_jobs(State(control): State<ControlApi>) -> Response {
        Json(control.list_jobs()).into_response()
    }

    async fn get_job(State(control): State<ControlApi>, Path(job): Path<String>) -> Response {
        job_response(control.get_job(&job))
    }

    async fn pause_job(State(control): State<ControlApi>, Path(job): Path<String>) -> Response {
        job_response(control.pause_job(&job))
    }

    async fn resume_job(State(control): State<ControlApi>, Path(job): Path<String>) -> Response {
        job_response(control.resume_job(&job))
    }

    async fn run_job(State(control): State<ControlApi>, Path(job): Path<String>) -> Response {
        job_response(control.run_job_now(&job))
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: returns 200 once the scheduler is running.
    async fn readiness(State(control): State<ControlApi>) -> impl IntoResponse {
        if control.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

fn exposition(result: Result<String, RegistryError>) -> Response {
    match result {
        Ok(body) => ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body).into_response(),
        Err(e @ RegistryError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, &e),
        Err(e) => {
            warn!(error = %e, "Exposition failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

fn job_response(result: Result<JobInfo, SchedulerError>) -> Response {
    match result {
        Ok(info) => Json(info).into_response(),
        Err(e @ SchedulerError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, &e),
        Err(e) => error_response(StatusCode::CONFLICT, &e),
    }
}

fn error_response(status: StatusCode, error: &dyn std::error::Error) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
