//! HTTP API for driving runs from a client.
//!
//! `POST /run` starts a run and returns its id; `GET /run/{id}/events`
//! streams the run's lifecycle events as SSE frames; results files are listed
//! and served read-only.

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::ApiError;
pub use routes::{create_router, AppState};
