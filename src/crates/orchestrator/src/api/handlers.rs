//! API handler functions.

use super::error::ApiError;
use super::routes::AppState;
use crate::run::DifficultyFilter;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Body of POST /run.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub difficulty: Option<DifficultyFilter>,
    #[serde(default)]
    pub num_questions: Option<usize>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

/// POST /run: start a run, return its id immediately.
pub async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(n) = body.num_questions {
        if n == 0 {
            return Err(ApiError::BadRequest(
                "num_questions must be at least 1".to_string(),
            ));
        }
    }

    let mut config = state.defaults.clone();
    if let Some(difficulty) = body.difficulty {
        config.difficulty = difficulty;
    }
    if let Some(n) = body.num_questions {
        config.num_questions = n;
    }
    if let Some(n) = body.max_iterations {
        config.max_iterations = n;
    }

    let handle = state.registry.create_run();
    let run_id = handle.run_id.clone();
    info!(run_id = %run_id, "starting run");

    let task_state = state.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        let outcome = task_state
            .orchestrator
            .execute_run(
                task_state.dataset.clone(),
                task_state.metadata.clone(),
                &config,
                handle.publisher.clone(),
                handle.cancel,
            )
            .await;

        match outcome {
            Ok(report) => {
                let filename = format!(
                    "eval_results_{}.json",
                    Utc::now().format("%Y%m%d_%H%M%S")
                );
                let path = task_state.results_dir.join(&filename);
                match serde_json::to_vec_pretty(&report)
                    .map_err(std::io::Error::other)
                    .and_then(|bytes| std::fs::write(&path, bytes))
                {
                    Ok(()) => info!(run_id = %task_run_id, file = %filename, "results written"),
                    Err(err) => {
                        error!(run_id = %task_run_id, error = %err, "failed to write results")
                    }
                }
            }
            Err(err) => error!(run_id = %task_run_id, error = %err, "run failed"),
        }
        task_state.registry.finish(&task_run_id);
    });

    Ok(Json(json!({"run_id": run_id})))
}

/// GET /run/{run_id}/events: the run's SSE stream.
///
/// Single consumer: the stream can be claimed once per run.
pub async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let receiver = state
        .registry
        .take_events(&run_id)
        .ok_or_else(|| ApiError::NotFound(format!("no event stream for run {run_id}")))?;

    let stream = ReceiverStream::new(receiver).map(|event| Event::default().json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// DELETE /run/{run_id}: request cooperative cancellation.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.cancel(&run_id) {
        Ok(Json(json!({"run_id": run_id, "status": "cancelling"})))
    } else {
        Err(ApiError::NotFound(format!("run {run_id} not found")))
    }
}

/// GET /files: list stored result files.
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut files: Vec<String> = std::fs::read_dir(&state.results_dir)
        .map_err(|e| ApiError::Internal(format!("cannot read results dir: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("eval_results_") && name.ends_with(".json"))
        .collect();
    files.sort();
    Ok(Json(json!({"files": files})))
}

/// GET /results/{filename}: one stored RunReport.
pub async fn get_result(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // Results are served by bare filename only.
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(ApiError::BadRequest("invalid filename".to_string()));
    }
    let path = state.results_dir.join(&filename);
    let bytes = std::fs::read(&path)
        .map_err(|_| ApiError::NotFound(format!("no result file {filename}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Internal(format!("stored report unreadable: {e}")))?;
    Ok(Json(value))
}
