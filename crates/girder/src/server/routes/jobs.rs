//! Job record endpoints: registration by the ingest collaborator,
//! completion callbacks from workers, operator error clearing, and the
//! dashboard listing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::job_repo::{self, JobRow};
use crate::pipeline::Stage;
use crate::server::error::ApiError;
use crate::server::state::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/pipeline/jobs", post(register_job).get(list_jobs))
        .route("/pipeline/jobs/{document_id}/advance", post(advance_job))
        .route(
            "/pipeline/jobs/{document_id}/clear-error",
            post(clear_job_error),
        )
}

/// Wire form of a job row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobView {
    document_id: String,
    external_ref: String,
    stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    attempt_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dispatched_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_attempt_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<JobRow> for JobView {
    fn from(row: JobRow) -> Self {
        Self {
            document_id: row.document_id,
            external_ref: row.external_ref,
            stage: row.stage,
            error_message: row.error_message,
            attempt_count: row.attempt_count,
            dispatched_at: row.dispatched_at,
            last_attempt_at: row.last_attempt_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterJobRequest {
    document_id: String,
    /// Identifier used when calling the worker. Defaults to the document id.
    #[serde(default)]
    external_ref: Option<String>,
}

/// Registers a newly ingested document at the initial stage.
async fn register_job(
    State(state): State<AppState>,
    Json(req): Json<RegisterJobRequest>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    if req.document_id.trim().is_empty() {
        return Err(ApiError::BadRequest("documentId must not be empty".to_string()));
    }

    let external_ref = req
        .external_ref
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(&req.document_id);

    let job = JobRow::new(&req.document_id, external_ref, Utc::now());
    job_repo::insert(&state.db, &job)?;
    tracing::info!(document_id = %job.document_id, "registered ingestion job");

    Ok((StatusCode::CREATED, Json(job.into())))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    stage: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct JobListResponse {
    jobs: Vec<JobView>,
}

/// Lists recent jobs, optionally restricted to one stage.
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let stage = match query.stage.as_deref() {
        Some(s) => Some(Stage::parse(s).map_err(|e| ApiError::BadRequest(e.to_string()))?),
        None => None,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);

    let rows = job_repo::list_recent(&state.db, stage, limit)?;
    Ok(Json(JobListResponse {
        jobs: rows.into_iter().map(JobView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct AdvanceRequest {
    stage: String,
}

/// Worker completion callback: advances the job to the given stage.
///
/// The write is a compare-and-set from the stage's predecessor, so a stale
/// or duplicate callback cannot skip a job forward or double-advance it.
async fn advance_job(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<JobView>, ApiError> {
    let target = Stage::parse(&req.stage).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let Some(from) = target.predecessor() else {
        return Err(ApiError::BadRequest(format!(
            "Cannot advance a job to the initial stage '{target}'"
        )));
    };

    let advanced = job_repo::advance_stage(&state.db, &document_id, from, target, Utc::now())?;
    if !advanced {
        return match job_repo::find_by_document_id(&state.db, &document_id)? {
            None => Err(ApiError::NotFound(format!(
                "No ingestion job for document '{document_id}'"
            ))),
            Some(row) => Err(ApiError::Conflict(format!(
                "Job for document '{document_id}' is at stage '{}'{}, expected '{from}'",
                row.stage,
                if row.error_message.is_some() {
                    " with an unresolved error"
                } else {
                    ""
                },
            ))),
        };
    }

    tracing::info!(document_id = %document_id, stage = %target, "job advanced");
    let row = job_repo::find_by_document_id(&state.db, &document_id)?.ok_or_else(|| {
        ApiError::NotFound(format!("No ingestion job for document '{document_id}'"))
    })?;
    Ok(Json(row.into()))
}

/// Operator action: clears a job's error so it re-enters the normal
/// eligibility rules at its current stage. Safe to repeat.
async fn clear_job_error(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let cleared = job_repo::clear_error(&state.db, &document_id, Utc::now())?;
    let row = job_repo::find_by_document_id(&state.db, &document_id)?.ok_or_else(|| {
        ApiError::NotFound(format!("No ingestion job for document '{document_id}'"))
    })?;
    if cleared {
        tracing::info!(document_id = %document_id, "cleared job error");
    }
    Ok(Json(row.into()))
}
