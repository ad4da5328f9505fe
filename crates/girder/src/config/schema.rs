use serde::{Deserialize, Serialize};

/// Service configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Address the pipeline API binds to.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// SQLite database path. Defaults to `~/.girder/data/girder.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Base URL of the worker fleet performing parse/embed/extract.
    pub worker_base_url: String,
    /// Bearer credential for worker calls, direct value.
    #[serde(default)]
    pub worker_token: Option<String>,
    /// Bearer credential, file reference (Docker secrets pattern).
    #[serde(default)]
    pub worker_token_file: Option<String>,
    /// Bearer credential, environment variable reference.
    #[serde(default)]
    pub worker_token_env_var: Option<String>,
    /// At most this many jobs are dispatched per trigger invocation.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
    /// Concurrent outbound worker calls within one batch.
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,
    /// Per-call timeout for worker requests, in seconds.
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    /// How long a dispatch claim blocks re-selection, in seconds.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: i64,
}

fn default_listen_address() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_batch_limit() -> u32 {
    10
}

fn default_dispatch_concurrency() -> usize {
    4
}

fn default_worker_timeout_secs() -> u64 {
    120
}

fn default_claim_ttl_secs() -> i64 {
    600
}
