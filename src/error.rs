//! Failure taxonomy for the retrieval stages.
//!
//! None of these escape a stage: each one is rendered into an
//! [`EvidenceItem`](crate::models::EvidenceItem) and the pipeline keeps going.
//! Only construction errors (config, bind, I/O in the CLI) travel as
//! `anyhow::Error`.

use std::path::PathBuf;

use thiserror::Error;

/// Why a retrieval stage, reindex or store load could not produce data.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("{table} not found in {}. Please run indexing first.", dir.display())]
    StoreMissing { table: &'static str, dir: PathBuf },

    #[error("failed to read {}: {reason}", path.display())]
    StoreUnreadable { path: PathBuf, reason: String },

    #[error("none of the required credentials are set: {}", vars.join(" or "))]
    MissingCredential { vars: Vec<String> },

    #[error("failed to launch `{command}`: {source}")]
    BackendSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}: {stderr}")]
    BackendExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
}

impl RetrievalError {
    /// True when the evidence tables themselves are absent, as opposed to
    /// present-but-broken or a backend failure.
    pub fn is_store_missing(&self) -> bool {
        matches!(self, RetrievalError::StoreMissing { .. })
    }
}
