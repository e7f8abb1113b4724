//! Agent error types

use std::io;

/// Transport-level agent failures
///
/// A command that ran and exited non-zero is not an `AgentError`; it is
/// reported as [`crate::RemoteOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Failed to create agent for builder {builder}: {message}")]
    Create { builder: String, message: String },

    #[error("Agent rejected payload for {dest}: {message}")]
    Rejected { dest: String, message: String },

    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Agent {0} is closed")]
    Closed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
