pub mod dispatcher;
pub mod error;
pub mod phase;
pub mod readiness;

pub use dispatcher::{DispatchResult, DispatchStatus, Dispatcher, DispatcherSettings, TriggerOutcome};
pub use error::PipelineError;
pub use phase::{Phase, Stage, UnknownStage};
pub use readiness::{PhaseCounter, PhaseReadiness};
