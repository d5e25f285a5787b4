// ABOUTME: Application-wide error types for remsh.
// ABOUTME: Uses thiserror for ergonomic error handling.

use crate::device::RemoteOs;
use crate::transport::{ExitStatus, TransportError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("SSH error: {0}")]
    Ssh(#[from] crate::ssh::Error),

    #[error("`{command}` failed with {status}: {}", stderr.trim())]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("{operation} is not supported on {os} remote targets")]
    Unsupported {
        operation: &'static str,
        os: RemoteOs,
    },

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Exit status of a failed remote command, if this error carries one.
    pub fn exit_status(&self) -> Option<&ExitStatus> {
        match self {
            Error::CommandFailed { status, .. } => Some(status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
