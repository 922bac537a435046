//! HTTP front door: `POST /run`, `GET /jobs/:job_id`, `GET /health`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};

use invoker_core::ports::Clock;
use invoker_core::{
    ActivationId, ExecutionResult, ExecutionStatus, JobHandle, ReportError, ResultReporter,
    Scheduler, SchedulerError, SubmitError, TaskDecoder,
};

use crate::config::ReportingMode;

/// Detail written for async jobs dropped from the queue at shutdown.
pub const SHUTDOWN_REJECTION: &str = "rejected during shutdown";

#[derive(Clone)]
pub struct AppState {
    pub decoder: TaskDecoder,
    pub scheduler: Arc<Scheduler>,
    pub reporter: ResultReporter,
    pub clock: Arc<dyn Clock>,
    pub mode: ReportingMode,
    pub background: BackgroundTasks,
}

impl AppState {
    /// Stop the scheduler, then wait until every admitted job is settled.
    ///
    /// Call after the server has stopped accepting requests.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.background.drain().await;
    }
}

/// Completion and report tasks that must finish before the process exits.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reaped().spawn(task);
    }

    /// Tasks still running.
    pub fn pending(&self) -> usize {
        self.reaped().len()
    }

    /// Wait for every task, including ones spawned while waiting.
    pub async fn drain(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.lock());
            if pending.is_empty() {
                return;
            }
            while let Some(done) = pending.join_next().await {
                log_join(done);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The set with finished tasks removed.
    fn reaped(&self) -> MutexGuard<'_, JoinSet<()>> {
        let mut tasks = self.lock();
        while let Some(done) = tasks.try_join_next() {
            log_join(done);
        }
        tasks
    }
}

fn log_join(done: Result<(), JoinError>) {
    if let Err(err) = done {
        tracing::error!(error = %err, "background task failed");
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/jobs/:job_id", get(job_state))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct RunResponse {
    job_id: String,
    activation_id: ActivationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<ExecutionStatus>,
    reported: bool,
    result_destination: String,
}

/// How a job ended from the front door's point of view.
enum Completion {
    Reported(ExecutionResult),
    NotReported(ExecutionResult, ReportError),
    Unfinished(SchedulerError),
}

/// Wait for the job and persist its result.
async fn complete(handle: JobHandle, reporter: ResultReporter, destination: String) -> Completion {
    let result = match handle.wait().await {
        Ok(result) => result,
        Err(err) => return Completion::Unfinished(err),
    };
    match reporter.report(&result, &destination).await {
        Ok(()) => Completion::Reported(result),
        Err(err) => Completion::NotReported(result, err),
    }
}

/// Settle an async job nobody is waiting on.
///
/// Queued jobs dropped at shutdown still get an `INTERNAL_ERROR` result at
/// their destination, since their caller was already told 202.
async fn settle(
    completion: Completion,
    reporter: &ResultReporter,
    clock: &dyn Clock,
    activation_id: ActivationId,
    destination: &str,
) {
    match completion {
        Completion::Reported(_) => {}
        Completion::NotReported(result, err) => tracing::error!(
            job_id = %result.job_id,
            task_status = ?result.status,
            error = %err,
            "result not persisted"
        ),
        Completion::Unfinished(SchedulerError::ShuttingDown(job_id)) => {
            let result =
                ExecutionResult::internal_error(job_id, SHUTDOWN_REJECTION, clock.now(), Duration::ZERO)
                    .with_activation(activation_id);
            if let Err(err) = reporter.report(&result, destination).await {
                tracing::error!(job_id = %result.job_id, error = %err, "shutdown rejection not persisted");
            }
        }
        Completion::Unfinished(err @ SchedulerError::Lost(_)) => {
            tracing::error!(error = %err, "job result lost")
        }
    }
}

async fn run(State(state): State<AppState>, body: Bytes) -> Response {
    let descriptor = match state.decoder.decode(&body) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            tracing::info!(error = %err, "rejected undecodable payload");
            return json_error(StatusCode::BAD_REQUEST, "decode_error", err.to_string());
        }
    };
    let destination = descriptor.result_destination.clone();

    let handle = match state.scheduler.submit(descriptor).await {
        Ok(handle) => handle,
        Err(err) => return submit_error(err),
    };
    let job_id = handle.job_id.clone();
    let activation_id = handle.activation_id;

    let reporter = state.reporter.clone();

    // runs to the end even if the client goes away
    if state.mode == ReportingMode::Async {
        let clock = Arc::clone(&state.clock);
        let dest = destination.clone();
        state.background.spawn(async move {
            let completion = complete(handle, reporter.clone(), dest.clone()).await;
            settle(completion, &reporter, &*clock, activation_id, &dest).await;
        });
        let body = RunResponse {
            job_id,
            activation_id,
            status: None,
            reported: false,
            result_destination: destination,
        };
        return (StatusCode::ACCEPTED, axum::Json(body)).into_response();
    }

    let (tx, completion) = oneshot::channel();
    let dest = destination.clone();
    state.background.spawn(async move {
        let _ = tx.send(complete(handle, reporter, dest).await);
    });

    match completion.await {
        Ok(Completion::Reported(result)) => {
            let body = RunResponse {
                job_id,
                activation_id,
                status: Some(result.status),
                reported: true,
                result_destination: destination,
            };
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        Ok(Completion::NotReported(result, err)) => {
            tracing::error!(%job_id, task_status = ?result.status, error = %err, "result not persisted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({
                    "error": "report_failed",
                    "message": err.to_string(),
                    "job_id": job_id,
                    "activation_id": activation_id,
                    "task_status": result.status,
                })),
            )
                .into_response()
        }
        Ok(Completion::Unfinished(err @ SchedulerError::ShuttingDown(_))) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", err.to_string())
        }
        Ok(Completion::Unfinished(err @ SchedulerError::Lost(_))) => {
            tracing::error!(%job_id, error = %err, "job result lost");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string())
        }
        Err(_) => {
            tracing::error!(%job_id, "completion task ended without a result");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("job {job_id} ended without a result"),
            )
        }
    }
}

async fn job_state(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.scheduler.state(&job_id).await {
        Some(job_state) => {
            axum::Json(json!({ "job_id": job_id, "state": job_state })).into_response()
        }
        None => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("unknown job {job_id}"),
        ),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let counts = state.scheduler.counts().await;
    axum::Json(json!({
        "status": "ok",
        "slots": state.scheduler.slots(),
        "counts": counts,
        "pending_reports": state.background.pending(),
    }))
    .into_response()
}

fn submit_error(err: SubmitError) -> Response {
    match err {
        SubmitError::Backpressure { .. } => {
            json_error(StatusCode::TOO_MANY_REQUESTS, "backpressure", err.to_string())
        }
        SubmitError::DuplicateJob(_) => {
            json_error(StatusCode::CONFLICT, "duplicate_job", err.to_string())
        }
        SubmitError::ShuttingDown => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", err.to_string())
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
