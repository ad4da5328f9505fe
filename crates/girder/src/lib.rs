pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod secrets;
pub mod server;

pub use config::{load_config, Config};
pub use error::{ConfigError, GirderError, Result};
pub use pipeline::{
    Dispatcher, DispatcherSettings, Phase, PhaseCounter, PipelineError, Stage, TriggerOutcome,
};
pub use secrets::{resolve_secret_optional, SecretError};
pub use server::AppState;
