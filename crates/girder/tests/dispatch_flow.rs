//! End-to-end dispatch tests against a mock worker fleet.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use secrecy::SecretString;

use girder::db::job_repo::{self, JobRow};
use girder::db::Database;
use girder::pipeline::{DispatchStatus, Dispatcher, DispatcherSettings, Phase, Stage};

/// One recorded worker call.
#[derive(Debug, Clone)]
struct WorkerHit {
    endpoint: String,
    document_id: String,
    external_ref: String,
    authorization: Option<String>,
}

#[derive(Clone, Default)]
struct WorkerState {
    hits: Arc<Mutex<Vec<WorkerHit>>>,
    fail_documents: Arc<Mutex<HashSet<String>>>,
}

impl WorkerState {
    fn fail_document(&self, document_id: &str) {
        self.fail_documents
            .lock()
            .unwrap()
            .insert(document_id.to_string());
    }

    fn hits(&self) -> Vec<WorkerHit> {
        self.hits.lock().unwrap().clone()
    }
}

async fn handle_dispatch(
    endpoint: &'static str,
    state: WorkerState,
    headers: HeaderMap,
    body: serde_json::Value,
) -> (StatusCode, Json<serde_json::Value>) {
    let document_id = body["documentId"].as_str().unwrap_or_default().to_string();
    let external_ref = body["externalRef"].as_str().unwrap_or_default().to_string();
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    state.hits.lock().unwrap().push(WorkerHit {
        endpoint: endpoint.to_string(),
        document_id: document_id.clone(),
        external_ref,
        authorization,
    });

    if state.fail_documents.lock().unwrap().contains(&document_id) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "segmentation failed" })),
        )
    } else {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "accepted" })),
        )
    }
}

/// Binds a mock worker on an ephemeral port and returns its base URL.
async fn spawn_worker(state: WorkerState) -> String {
    let app = Router::new()
        .route(
            "/parse",
            post(
                |State(s): State<WorkerState>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    handle_dispatch("/parse", s, headers, body).await
                },
            ),
        )
        .route(
            "/embed",
            post(
                |State(s): State<WorkerState>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    handle_dispatch("/embed", s, headers, body).await
                },
            ),
        )
        .route(
            "/extract",
            post(
                |State(s): State<WorkerState>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    handle_dispatch("/extract", s, headers, body).await
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn settings(base_url: &str) -> DispatcherSettings {
    DispatcherSettings {
        worker_base_url: base_url.to_string(),
        worker_token: None,
        batch_limit: 10,
        dispatch_concurrency: 4,
        worker_timeout: Duration::from_secs(5),
        claim_ttl_secs: 600,
    }
}

fn seed_jobs(db: &Database, count: usize) -> Vec<JobRow> {
    // Spread creation times so the eligibility ordering is deterministic.
    (0..count)
        .map(|i| {
            let now = Utc::now() - chrono::Duration::seconds((count - i) as i64);
            let job = JobRow::new(&format!("doc-{i:02}"), &format!("ff-{i:02}"), now);
            job_repo::insert(db, &job).unwrap();
            job
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_failure_does_not_block_siblings() {
    let worker = WorkerState::default();
    worker.fail_document("doc-00");
    let base_url = spawn_worker(worker.clone()).await;

    let db = Database::open_in_memory().unwrap();
    seed_jobs(&db, 2);

    let dispatcher = Dispatcher::new(db.clone(), settings(&base_url)).unwrap();
    let outcome = dispatcher.trigger(Phase::Parse, None).await.unwrap();

    assert_eq!(outcome.attempted, 2);
    assert_eq!(outcome.succeeded, 1);

    let errors: Vec<_> = outcome
        .results
        .iter()
        .filter(|r| r.status == DispatchStatus::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].document_id, "doc-00");
    assert!(errors[0].message.as_ref().unwrap().contains("500"));

    // Both jobs reached the worker despite the failure.
    assert_eq!(worker.hits().len(), 2);

    // The failed job is frozen; the successful one keeps its claim.
    let failed = job_repo::find_by_document_id(&db, "doc-00").unwrap().unwrap();
    assert!(failed.error_message.is_some());
    assert_eq!(failed.stage, Stage::RawIngested);
    let ok = job_repo::find_by_document_id(&db, "doc-01").unwrap().unwrap();
    assert!(ok.error_message.is_none());
    assert!(ok.dispatched_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_limit_and_claims_prevent_duplicate_dispatch() {
    let worker = WorkerState::default();
    let base_url = spawn_worker(worker.clone()).await;

    let db = Database::open_in_memory().unwrap();
    seed_jobs(&db, 15);

    let dispatcher = Dispatcher::new(db.clone(), settings(&base_url)).unwrap();

    // First trigger dispatches exactly the batch limit.
    let first = dispatcher.trigger(Phase::Parse, None).await.unwrap();
    assert_eq!(first.attempted, 10);
    assert_eq!(first.succeeded, 10);

    // Second immediate trigger, before any stage advance: the claimed ten
    // must not be re-surfaced, only the remaining five go out.
    let second = dispatcher.trigger(Phase::Parse, None).await.unwrap();
    assert_eq!(second.attempted, 5);

    let dispatched: Vec<String> = worker
        .hits()
        .iter()
        .map(|h| h.document_id.clone())
        .collect();
    assert_eq!(dispatched.len(), 15);
    let unique: HashSet<&String> = dispatched.iter().collect();
    assert_eq!(unique.len(), 15, "a job was dispatched twice: {dispatched:?}");

    // Third trigger finds nothing left.
    let third = dispatcher.trigger(Phase::Parse, None).await.unwrap();
    assert_eq!(third.attempted, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_eligible_set_is_a_zero_result_success() {
    let worker = WorkerState::default();
    let base_url = spawn_worker(worker.clone()).await;

    let db = Database::open_in_memory().unwrap();
    let dispatcher = Dispatcher::new(db, settings(&base_url)).unwrap();

    let outcome = dispatcher.trigger(Phase::Embed, None).await.unwrap();
    assert_eq!(outcome.attempted, 0);
    assert_eq!(outcome.succeeded, 0);
    assert!(outcome.results.is_empty());
    assert!(worker.hits().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn explicit_document_list_restricts_the_batch() {
    let worker = WorkerState::default();
    let base_url = spawn_worker(worker.clone()).await;

    let db = Database::open_in_memory().unwrap();
    seed_jobs(&db, 4);

    let dispatcher = Dispatcher::new(db, settings(&base_url)).unwrap();
    let outcome = dispatcher
        .trigger(
            Phase::Parse,
            Some(vec!["doc-01".to_string(), "doc-03".to_string()]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.attempted, 2);
    let hit_docs: HashSet<String> = worker
        .hits()
        .iter()
        .map(|h| h.document_id.clone())
        .collect();
    assert_eq!(
        hit_docs,
        HashSet::from(["doc-01".to_string(), "doc-03".to_string()])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_carries_bearer_credential_and_refs() {
    let worker = WorkerState::default();
    let base_url = spawn_worker(worker.clone()).await;

    let db = Database::open_in_memory().unwrap();
    let job = JobRow::new("doc-a", "transcript-42", Utc::now());
    job_repo::insert(&db, &job).unwrap();
    job_repo::advance_stage(&db, "doc-a", Stage::RawIngested, Stage::Segmented, Utc::now())
        .unwrap();

    let mut s = settings(&base_url);
    s.worker_token = Some(SecretString::from("test-token".to_string()));
    let dispatcher = Dispatcher::new(db, s).unwrap();

    let outcome = dispatcher.trigger(Phase::Embed, None).await.unwrap();
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.results[0].external_ref, "transcript-42");

    let hits = worker.hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].endpoint, "/embed");
    assert_eq!(hits[0].external_ref, "transcript-42");
    assert_eq!(hits[0].document_id, "doc-a");
    assert_eq!(hits[0].authorization.as_deref(), Some("Bearer test-token"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_worker_freezes_the_job() {
    // Nothing is listening here; connections are refused immediately.
    let db = Database::open_in_memory().unwrap();
    seed_jobs(&db, 1);

    let mut s = settings("http://127.0.0.1:1");
    s.worker_timeout = Duration::from_secs(2);
    let dispatcher = Dispatcher::new(db.clone(), s).unwrap();

    let outcome = dispatcher.trigger(Phase::Parse, None).await.unwrap();
    assert_eq!(outcome.attempted, 1);
    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.results[0].status, DispatchStatus::Error);

    let row = job_repo::find_by_document_id(&db, "doc-00").unwrap().unwrap();
    assert!(row.error_message.is_some());

    // Frozen jobs are excluded from the next trigger entirely.
    let again = dispatcher.trigger(Phase::Parse, None).await.unwrap();
    assert_eq!(again.attempted, 0);
}
