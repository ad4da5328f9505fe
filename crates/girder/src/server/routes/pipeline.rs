//! Trigger and readiness endpoints — the pipeline's operation surface.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::pipeline::{DispatchStatus, Phase, PhaseReadiness, TriggerOutcome};
use crate::server::error::ApiError;
use crate::server::state::AppState;

pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/pipeline/trigger", post(trigger_phase))
        .route("/pipeline/readiness", get(readiness))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest {
    phase: String,
    #[serde(default)]
    document_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerResponse {
    message: String,
    /// Dispatches the worker accepted.
    processed: usize,
    /// Jobs attempted in this batch.
    total: usize,
    results: Vec<ResultEntry>,
}

#[derive(Debug, Serialize)]
struct ResultEntry {
    /// The external reference sent to the worker.
    #[serde(rename = "ref")]
    reference: String,
    status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl TriggerResponse {
    fn new(phase: Phase, outcome: TriggerOutcome) -> Self {
        let message = if outcome.attempted == 0 {
            format!("No documents ready for {phase}")
        } else {
            format!(
                "Triggered {phase} for {} of {} documents",
                outcome.succeeded, outcome.attempted
            )
        };
        let results = outcome
            .results
            .into_iter()
            .map(|r| ResultEntry {
                reference: r.external_ref,
                status: r.status,
                message: r.message,
            })
            .collect();
        Self {
            message,
            processed: outcome.succeeded,
            total: outcome.attempted,
            results,
        }
    }
}

/// Triggers a phase for ready (or explicitly listed) documents.
///
/// Partial failure is a normal, reportable outcome: the response is 2xx
/// even when some or all per-job dispatches failed, and the caller must
/// inspect `results` to know true success.
async fn trigger_phase(
    State(state): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, ApiError> {
    // Reject unknown phases before any store access.
    let phase = Phase::parse(&req.phase)?;
    let outcome = state.dispatcher.trigger(phase, req.document_ids).await?;
    Ok(Json(TriggerResponse::new(phase, outcome)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    phase_counts: Vec<PhaseReadiness>,
}

/// Readiness snapshot: eligible-job counts for every known phase.
async fn readiness(State(state): State<AppState>) -> Result<Json<ReadinessResponse>, ApiError> {
    let phase_counts = state.counter.snapshot()?;
    Ok(Json(ReadinessResponse { phase_counts }))
}
