//! Readiness snapshot — how many jobs each phase could pick up right now.
//!
//! Read-only; used by dashboards and pollers to decide whether triggering
//! is worthwhile. Counts only, never a full fetch.

use chrono::Utc;
use serde::Serialize;

use crate::db::job_repo::{self, format_timestamp};
use crate::db::Database;

use super::error::PipelineError;
use super::phase::{Phase, Stage};

/// Eligible-job count for one phase at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReadiness {
    pub phase: Phase,
    pub ready: u64,
    pub stage: Stage,
}

pub struct PhaseCounter {
    db: Database,
    claim_ttl_secs: i64,
}

impl PhaseCounter {
    pub fn new(db: Database, claim_ttl_secs: i64) -> Self {
        Self { db, claim_ttl_secs }
    }

    /// Counts eligible jobs for every known phase. Uses the same predicate
    /// as dispatch selection, so the numbers reflect what a trigger would
    /// actually pick up.
    pub fn snapshot(&self) -> Result<Vec<PhaseReadiness>, PipelineError> {
        let cutoff = format_timestamp(Utc::now() - chrono::Duration::seconds(self.claim_ttl_secs));
        Phase::ALL
            .iter()
            .map(|&phase| {
                let stage = phase.input_stage();
                let ready = job_repo::count_eligible(&self.db, stage, &cutoff)?;
                Ok(PhaseReadiness {
                    phase,
                    ready,
                    stage,
                })
            })
            .collect()
    }
}
