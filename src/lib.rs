// ABOUTME: Library root for remsh - remote command execution and port forwarding.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod device;
pub mod error;
pub mod exec;
pub mod pump;
pub mod ssh;
pub mod transport;
pub mod tunnel;
