// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, authentication, and host key verification failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: no valid credentials")]
    AuthenticationFailed,

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
