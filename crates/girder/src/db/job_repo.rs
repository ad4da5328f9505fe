//! Ingestion-job repository — the single read/write boundary to persisted
//! pipeline state.
//!
//! Eligibility for a phase is a predicate, not a status flag: a job is
//! eligible when its stage matches the phase's input stage, it carries no
//! unresolved error, and no live dispatch claim is held on it. All writes
//! are conditional single-row updates so concurrent triggers cannot
//! double-dispatch or corrupt a stage transition.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::pipeline::Stage;

/// Formats a timestamp for storage. Fixed width so stored values compare
/// correctly as strings in SQL.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An ingestion job row.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    /// Identifier of the owning document. One job per document.
    pub document_id: String,
    /// Identifier used when calling the worker (e.g. an upstream
    /// transcript id). May differ from `document_id`.
    pub external_ref: String,
    /// Last completed transformation.
    pub stage: Stage,
    /// Non-null means the job is stalled at its current stage and is
    /// excluded from dispatch until cleared.
    pub error_message: Option<String>,
    pub attempt_count: i64,
    /// Live dispatch claim. Set when a trigger claims the job, cleared
    /// when the worker advances the stage. A claim older than the
    /// configured TTL no longer blocks eligibility.
    pub dispatched_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    /// Builds a fresh job at the initial stage.
    pub fn new(document_id: &str, external_ref: &str, now: DateTime<Utc>) -> Self {
        let ts = format_timestamp(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            external_ref: external_ref.to_string(),
            stage: Stage::RawIngested,
            error_message: None,
            attempt_count: 0,
            dispatched_at: None,
            last_attempt_at: None,
            created_at: ts.clone(),
            updated_at: ts,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let stage_raw: String = row.get("stage")?;
        let stage = Stage::parse(&stage_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            external_ref: row.get("external_ref")?,
            stage,
            error_message: row.get("error_message")?,
            attempt_count: row.get("attempt_count")?,
            dispatched_at: row.get("dispatched_at")?,
            last_attempt_at: row.get("last_attempt_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new job row. A second job for the same document is a
/// `Duplicate` error, not an overwrite.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let result = conn.execute(
            "INSERT INTO ingestion_jobs (id, document_id, external_ref, stage, error_message,
             attempt_count, dispatched_at, last_attempt_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.document_id,
                job.external_ref,
                job.stage.as_str(),
                job.error_message,
                job.attempt_count,
                job.dispatched_at,
                job.last_attempt_at,
                job.created_at,
                job.updated_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DatabaseError::Duplicate {
                    key: job.document_id.clone(),
                })
            }
            Err(e) => Err(DatabaseError::Sqlite(e)),
        }
    })
}

/// Finds a job by its owning document.
pub fn find_by_document_id(
    db: &Database,
    document_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM ingestion_jobs WHERE document_id = ?1")?;
        let mut rows = stmt.query_map(params![document_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

const ELIGIBLE_PREDICATE: &str =
    "stage = ?1 AND error_message IS NULL AND (dispatched_at IS NULL OR dispatched_at < ?2)";

/// Returns jobs eligible for a phase whose input stage is `stage`, oldest
/// first, capped at `limit`. `claim_cutoff` is the timestamp before which a
/// dispatch claim counts as expired. An empty result is not an error.
pub fn find_eligible(
    db: &Database,
    stage: Stage,
    document_ids: Option<&[String]>,
    limit: u32,
    claim_cutoff: &str,
) -> Result<Vec<JobRow>, DatabaseError> {
    if let Some(ids) = document_ids {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
    }

    db.with_conn(|conn| {
        let mut sql = format!("SELECT * FROM ingestion_jobs WHERE {}", ELIGIBLE_PREDICATE);
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(stage.as_str().to_string()),
            Box::new(claim_cutoff.to_string()),
        ];

        if let Some(ids) = document_ids {
            let mut placeholders = Vec::with_capacity(ids.len());
            for id in ids {
                param_values.push(Box::new(id.clone()));
                placeholders.push(format!("?{}", param_values.len()));
            }
            sql.push_str(&format!(
                " AND document_id IN ({})",
                placeholders.join(", ")
            ));
        }

        param_values.push(Box::new(limit as i64));
        sql.push_str(&format!(
            " ORDER BY created_at ASC LIMIT ?{}",
            param_values.len()
        ));

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    })
}

/// Counts jobs eligible for the given input stage, unbounded. Uses the
/// same predicate as `find_eligible` so readiness reflects what a trigger
/// would actually pick up.
pub fn count_eligible(db: &Database, stage: Stage, claim_cutoff: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM ingestion_jobs WHERE {}",
                ELIGIBLE_PREDICATE
            ),
            params![stage.as_str(), claim_cutoff],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Claims a job for dispatch: a conditional single-row update that only
/// succeeds if the job is still eligible. Returns false when another
/// trigger won the race (or the job moved on), in which case the caller
/// must not dispatch it.
pub fn claim(
    db: &Database,
    job_id: &str,
    stage: Stage,
    now: DateTime<Utc>,
    claim_cutoff: &str,
) -> Result<bool, DatabaseError> {
    let ts = format_timestamp(now);
    db.with_conn(|conn| {
        let affected = conn.execute(
            &format!(
                "UPDATE ingestion_jobs
                 SET dispatched_at = ?3, last_attempt_at = ?3,
                     attempt_count = attempt_count + 1, updated_at = ?3
                 WHERE id = ?4 AND {}",
                ELIGIBLE_PREDICATE
            ),
            params![stage.as_str(), claim_cutoff, ts, job_id],
        )?;
        Ok(affected == 1)
    })
}

/// Records a dispatch failure on a job, freezing it at its current stage
/// until the error is cleared. Setting the same message twice is a no-op.
pub fn record_failure(
    db: &Database,
    job_id: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let ts = format_timestamp(now);
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE ingestion_jobs SET error_message = ?2, updated_at = ?3
             WHERE id = ?1 AND error_message IS NOT ?2",
            params![job_id, message, ts],
        )?;
        Ok(())
    })
}

/// Advances a job's stage: compare-and-set from the expected current stage,
/// clearing any dispatch claim. This is the write path worker completion
/// callbacks land on. Returns false when the job was not at `from` (stale
/// callback, concurrent advance) or carries an unresolved error.
pub fn advance_stage(
    db: &Database,
    document_id: &str,
    from: Stage,
    to: Stage,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let ts = format_timestamp(now);
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE ingestion_jobs
             SET stage = ?3, dispatched_at = NULL, updated_at = ?4
             WHERE document_id = ?1 AND stage = ?2 AND error_message IS NULL",
            params![document_id, from.as_str(), to.as_str(), ts],
        )?;
        Ok(affected == 1)
    })
}

/// Clears a job's error so it re-enters the normal eligibility rules at
/// its current stage. Returns false when there was no error to clear.
pub fn clear_error(
    db: &Database,
    document_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let ts = format_timestamp(now);
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE ingestion_jobs
             SET error_message = NULL, dispatched_at = NULL, updated_at = ?2
             WHERE document_id = ?1 AND error_message IS NOT NULL",
            params![document_id, ts],
        )?;
        Ok(affected == 1)
    })
}

/// Lists jobs newest first, optionally restricted to one stage.
pub fn list_recent(
    db: &Database,
    stage: Option<Stage>,
    limit: u32,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let rows = match stage {
            Some(stage) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM ingestion_jobs WHERE stage = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![stage.as_str(), limit as i64], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM ingestion_jobs ORDER BY created_at DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}
