//! API route definitions.

use crate::registry::RunRegistry;
use crate::run::{Orchestrator, RunConfig};
use axum::routing::{delete, get, post};
use axum::Router;
use dagprobe_core::{Dataset, Metadata};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RunRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub dataset: Arc<Dataset>,
    pub metadata: Arc<Metadata>,
    pub results_dir: PathBuf,
    pub defaults: RunConfig,
}

/// Build the complete API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/run", post(handlers::start_run))
        .route("/run/:run_id/events", get(handlers::run_events))
        .route("/run/:run_id", delete(handlers::cancel_run))
        .route("/files", get(handlers::list_files))
        .route("/results/:filename", get(handlers::get_result))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
