//! HTTP surface of the pipeline.

pub mod error;
pub mod routes;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

use routes::{health_routes, job_routes, pipeline_routes};

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(pipeline_routes())
        .merge(job_routes())
        .with_state(state)
        .merge(health_routes())
        .layer(TraceLayer::new_for_http())
}
