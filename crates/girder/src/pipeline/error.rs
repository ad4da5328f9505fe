use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Caller asked for a phase this pipeline does not know.
    /// Rejected before any store access.
    #[error("Unknown pipeline phase '{0}'")]
    InvalidPhase(String),

    /// The job store could not be reached or a query failed. Fatal for
    /// the whole operation.
    #[error("Job store unavailable: {0}")]
    Store(#[from] DatabaseError),

    /// The outbound HTTP client could not be constructed.
    #[error("Failed to build worker HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
