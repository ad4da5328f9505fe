use std::sync::Arc;

use crate::db::Database;
use crate::pipeline::{Dispatcher, DispatcherSettings, PhaseCounter, PipelineError};

/// Shared handler state: the job store plus the two pipeline components
/// built on top of it.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub dispatcher: Arc<Dispatcher>,
    pub counter: Arc<PhaseCounter>,
}

impl AppState {
    pub fn new(db: Database, settings: DispatcherSettings) -> Result<Self, PipelineError> {
        let counter = Arc::new(PhaseCounter::new(db.clone(), settings.claim_ttl_secs));
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), settings)?);
        Ok(Self {
            db,
            dispatcher,
            counter,
        })
    }
}
