//! Phase dispatcher — orchestrates one trigger invocation.
//!
//! Selects a bounded batch of eligible jobs, claims each one with a
//! conditional store update, and POSTs it to the worker endpoint for the
//! phase. Each outbound call is independent: a failure on one job never
//! prevents the rest of the batch from being attempted. The dispatcher
//! records trigger outcomes only; actual stage advancement is the worker's
//! write when it later reports completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::db::job_repo::{self, format_timestamp, JobRow};
use crate::db::Database;

use super::error::PipelineError;
use super::phase::Phase;

/// Maximum length for worker error bodies kept as diagnostics.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates a worker response body to a loggable diagnostic.
fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        format!("{}... (truncated)", &body[..MAX_ERROR_BODY_LENGTH])
    } else {
        body.to_string()
    }
}

/// Tuning knobs for the dispatcher, resolved from configuration.
#[derive(Debug)]
pub struct DispatcherSettings {
    /// Base URL of the worker fleet, e.g. `https://workers.internal`.
    pub worker_base_url: String,
    /// Bearer credential for worker calls. `None` sends no Authorization
    /// header, which keeps local development working without secrets.
    pub worker_token: Option<SecretString>,
    /// Admission control: at most this many jobs per trigger invocation.
    pub batch_limit: u32,
    /// Concurrent outbound worker calls within one batch.
    pub dispatch_concurrency: usize,
    /// Per-call timeout for worker requests. Workers only accept or
    /// reject here; the slow computation happens after the accept.
    pub worker_timeout: Duration,
    /// How long a dispatch claim blocks re-selection of the same job.
    pub claim_ttl_secs: i64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            worker_base_url: String::new(),
            worker_token: None,
            batch_limit: 10,
            dispatch_concurrency: 4,
            worker_timeout: Duration::from_secs(120),
            claim_ttl_secs: 600,
        }
    }
}

/// Outcome of one per-job dispatch.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Triggered,
    Error,
}

/// Per-job result of a trigger invocation.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub document_id: String,
    pub external_ref: String,
    pub status: DispatchStatus,
    pub message: Option<String>,
}

impl DispatchResult {
    fn triggered(job: &JobRow) -> Self {
        Self {
            document_id: job.document_id.clone(),
            external_ref: job.external_ref.clone(),
            status: DispatchStatus::Triggered,
            message: None,
        }
    }

    fn failed(job: &JobRow, message: String) -> Self {
        Self {
            document_id: job.document_id.clone(),
            external_ref: job.external_ref.clone(),
            status: DispatchStatus::Error,
            message: Some(message),
        }
    }
}

/// Aggregated result of one trigger invocation.
#[derive(Debug, Default)]
pub struct TriggerOutcome {
    /// Jobs actually claimed and dispatched.
    pub attempted: usize,
    /// Jobs whose worker accepted the dispatch.
    pub succeeded: usize,
    pub results: Vec<DispatchResult>,
}

impl TriggerOutcome {
    fn from_results(results: Vec<DispatchResult>) -> Self {
        let succeeded = results
            .iter()
            .filter(|r| r.status == DispatchStatus::Triggered)
            .count();
        Self {
            attempted: results.len(),
            succeeded,
            results,
        }
    }
}

/// Request body sent to a worker endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    external_ref: &'a str,
    document_id: &'a str,
}

pub struct Dispatcher {
    db: Database,
    client: Client,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(db: Database, settings: DispatcherSettings) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.worker_timeout)
            .build()?;
        Ok(Self {
            db,
            client,
            settings,
        })
    }

    /// Claims that expire before this instant no longer block dispatch.
    pub(crate) fn claim_cutoff(&self, now: DateTime<Utc>) -> String {
        format_timestamp(now - chrono::Duration::seconds(self.settings.claim_ttl_secs))
    }

    /// Triggers one phase for eligible documents (optionally restricted to
    /// an explicit document-id list). An empty eligible set is a normal
    /// zero-result outcome, not an error.
    #[tracing::instrument(skip_all, fields(phase = %phase))]
    pub async fn trigger(
        &self,
        phase: Phase,
        document_ids: Option<Vec<String>>,
    ) -> Result<TriggerOutcome, PipelineError> {
        let stage = phase.input_stage();
        let now = Utc::now();
        let cutoff = self.claim_cutoff(now);

        let jobs = job_repo::find_eligible(
            &self.db,
            stage,
            document_ids.as_deref(),
            self.settings.batch_limit,
            &cutoff,
        )?;

        if jobs.is_empty() {
            debug!(stage = %stage, "no eligible jobs");
            return Ok(TriggerOutcome::default());
        }

        info!(
            stage = %stage,
            batch = jobs.len(),
            "dispatching batch to worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.dispatch_concurrency.max(1)));
        let futures: Vec<_> = jobs
            .iter()
            .map(|job| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return None,
                    };
                    self.dispatch_one(phase, job).await
                }
            })
            .collect();

        let results: Vec<DispatchResult> =
            join_all(futures).await.into_iter().flatten().collect();

        let outcome = TriggerOutcome::from_results(results);
        info!(
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            "trigger complete"
        );
        Ok(outcome)
    }

    /// Dispatches a single job. Returns `None` when the claim was lost to a
    /// concurrent trigger (the job is simply not part of this batch).
    async fn dispatch_one(&self, phase: Phase, job: &JobRow) -> Option<DispatchResult> {
        let now = Utc::now();
        let cutoff = self.claim_cutoff(now);
        let claimed =
            match job_repo::claim(&self.db, &job.id, phase.input_stage(), now, &cutoff) {
                Ok(claimed) => claimed,
                Err(e) => {
                    // The store write failed; do not call the worker for a
                    // job we could not claim.
                    warn!(document_id = %job.document_id, "claim failed: {e}");
                    return Some(DispatchResult::failed(
                        job,
                        format!("Failed to claim job: {e}"),
                    ));
                }
            };
        if !claimed {
            debug!(document_id = %job.document_id, "lost claim race, skipping");
            return None;
        }

        match self.call_worker(phase, job).await {
            Ok(()) => {
                debug!(document_id = %job.document_id, "worker accepted dispatch");
                Some(DispatchResult::triggered(job))
            }
            Err(message) => {
                warn!(document_id = %job.document_id, "dispatch failed: {message}");
                if let Err(e) = job_repo::record_failure(&self.db, &job.id, &message, Utc::now())
                {
                    error!(
                        document_id = %job.document_id,
                        "failed to record dispatch failure: {e}"
                    );
                }
                Some(DispatchResult::failed(job, message))
            }
        }
    }

    /// One HTTP POST to the phase's worker endpoint. Any non-success
    /// response or transport failure comes back as a diagnostic message.
    async fn call_worker(&self, phase: Phase, job: &JobRow) -> Result<(), String> {
        let url = format!(
            "{}{}",
            self.settings.worker_base_url.trim_end_matches('/'),
            phase.endpoint()
        );
        let body = WorkerRequest {
            external_ref: &job.external_ref,
            document_id: &job.document_id,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.settings.worker_token {
            request = request.bearer_auth(token.expose_secret());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(format!(
                    "Worker returned {} for {}: {}",
                    status,
                    phase,
                    truncate_body(&body)
                ))
            }
            Err(e) => Err(format!("Worker request for {} failed: {}", phase, e)),
        }
    }
}
