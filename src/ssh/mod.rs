// ABOUTME: SSH transport for remote command execution and port tunneling.
// ABOUTME: Supports SSH agent and key-based authentication with known_hosts verification.

mod channel;
mod client;
mod error;

pub use client::{Session, SessionConfig};
pub use error::{Error, Result};
