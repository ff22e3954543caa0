//! Error types for plothub.

use std::path::PathBuf;

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while driving worker processes.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Failed to spawn worker on port {port}: {reason}")]
    SpawnFailed { port: u16, reason: String },

    #[error("Failed to terminate worker process: {reason}")]
    TerminateFailed { reason: String },

    #[error("Orchestrator event loop has stopped")]
    Stopped,
}

/// A content write that failed; recorded against the job's artifact.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token cleanup failed: {0}")]
    Tokens(#[from] TokenStoreError),
}

/// Failures reading the content directories at startup.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Token persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Failed to read token file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write token file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed token file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures while forwarding a request to the active worker.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Upstream request to port {port} failed: {reason}")]
    Upstream { port: u16, reason: String },

    #[error("Failed to build upstream request: {0}")]
    InvalidRequest(String),
}
