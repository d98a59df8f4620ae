// Errors that end a process at boot or while supervising workers.
// Request-level errors live in web::error.

use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot prepare images directory: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot locate the server executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("Failed to spawn worker for port {port}: {source}")]
    Spawn {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker on port {port} exited unexpectedly: {reason}")]
    WorkerExited { port: u16, reason: String },

    #[error("Failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Server run error: {0}")]
    Serve(#[source] std::io::Error),
}
