//! Pipeline stages and phases.
//!
//! A `Stage` is the persisted state on an ingestion job: the last completed
//! transformation. A `Phase` is one of the transformations a trigger can
//! dispatch. Each phase consumes jobs sitting at exactly one input stage and
//! hands them to one worker endpoint; the association lives in the `Phase`
//! methods so adding a phase is a new enum variant plus table entries, not a
//! new branch somewhere else.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::PipelineError;

/// The last completed transformation recorded on a job.
///
/// Order is fixed and monotonic: a job never regresses except by operator
/// intervention outside this service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RawIngested,
    Segmented,
    Embedded,
    Extracted,
}

/// Parse failure for a stage value read back from the store.
#[derive(Debug, Error)]
#[error("unknown stage '{0}'")]
pub struct UnknownStage(pub String);

impl Stage {
    /// The stored string form, also used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RawIngested => "raw_ingested",
            Stage::Segmented => "segmented",
            Stage::Embedded => "embedded",
            Stage::Extracted => "extracted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownStage> {
        match s {
            "raw_ingested" => Ok(Stage::RawIngested),
            "segmented" => Ok(Stage::Segmented),
            "embedded" => Ok(Stage::Embedded),
            "extracted" => Ok(Stage::Extracted),
            other => Err(UnknownStage(other.to_string())),
        }
    }

    /// The stage a successful phase run advances to, `None` once terminal.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::RawIngested => Some(Stage::Segmented),
            Stage::Segmented => Some(Stage::Embedded),
            Stage::Embedded => Some(Stage::Extracted),
            Stage::Extracted => None,
        }
    }

    /// The stage a worker callback must find the job at to advance it here.
    pub fn predecessor(&self) -> Option<Stage> {
        match self {
            Stage::RawIngested => None,
            Stage::Segmented => Some(Stage::RawIngested),
            Stage::Embedded => Some(Stage::Segmented),
            Stage::Extracted => Some(Stage::Embedded),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Extracted)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dispatchable pipeline transformation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Parse,
    Embed,
    Extract,
}

impl Phase {
    /// Every known phase, in pipeline order.
    pub const ALL: [Phase; 3] = [Phase::Parse, Phase::Embed, Phase::Extract];

    /// Parses a caller-supplied phase name. Unknown names are rejected
    /// before any store access happens.
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        match s {
            "parse" => Ok(Phase::Parse),
            "embed" => Ok(Phase::Embed),
            "extract" => Ok(Phase::Extract),
            other => Err(PipelineError::InvalidPhase(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Parse => "parse",
            Phase::Embed => "embed",
            Phase::Extract => "extract",
        }
    }

    /// The stage a job must sit at to be eligible for this phase.
    pub fn input_stage(&self) -> Stage {
        match self {
            Phase::Parse => Stage::RawIngested,
            Phase::Embed => Stage::Segmented,
            Phase::Extract => Stage::Embedded,
        }
    }

    /// The stage the worker advances the job to when it completes.
    pub fn output_stage(&self) -> Stage {
        match self {
            Phase::Parse => Stage::Segmented,
            Phase::Embed => Stage::Embedded,
            Phase::Extract => Stage::Extracted,
        }
    }

    /// Path on the worker base URL that performs this phase.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Phase::Parse => "/parse",
            Phase::Embed => "/embed",
            Phase::Extract => "/extract",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
