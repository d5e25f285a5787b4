// ABOUTME: Remote device binding: transport, OS class and default environment.
// ABOUTME: Entry point for commands, port forwarding and file operations.

mod fs;

pub use fs::{Cleanup, push_mode};

use crate::error::{Error, Result};
use crate::exec::{Cmd, CommandLauncher, Env, RemoteProcess};
use crate::transport::{ExitStatus, Transport};
use crate::tunnel::{ForwardHandle, TunnelManager};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default timeout for [`Device::call`] and [`Device::run`].
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a timed-out command may take to exit after being killed.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Operating system class of the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteOs {
    #[default]
    Linux,
    #[serde(alias = "osx", alias = "darwin")]
    Macos,
    Windows,
    Unknown,
}

impl RemoteOs {
    /// Whether the remote shell and utilities follow POSIX conventions.
    pub fn is_posix(self) -> bool {
        matches!(self, RemoteOs::Linux | RemoteOs::Macos)
    }
}

impl fmt::Display for RemoteOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOs::Linux => "linux",
            RemoteOs::Macos => "macos",
            RemoteOs::Windows => "windows",
            RemoteOs::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Captured result of a command run to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A remote host reachable through a shared [`Transport`].
#[derive(Clone)]
pub struct Device {
    launcher: CommandLauncher,
    tunnels: TunnelManager,
    os: RemoteOs,
    command_timeout: Duration,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("os", &self.os)
            .field("env", self.launcher.env())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl Device {
    /// Bind a device without fetching its environment.
    pub fn new(transport: Arc<dyn Transport>, os: RemoteOs) -> Self {
        Self {
            launcher: CommandLauncher::new(Arc::clone(&transport)),
            tunnels: TunnelManager::new(transport),
            os,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Bind a device and capture its default environment with `env`.
    pub async fn connect(transport: Arc<dyn Transport>, os: RemoteOs) -> Result<Self> {
        let mut device = Self::new(transport, os);
        let env = device.fetch_env().await?;
        device.launcher.set_env(env);
        Ok(device)
    }

    pub fn with_env(mut self, env: Env) -> Self {
        self.launcher.set_env(env);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn os(&self) -> RemoteOs {
        self.os
    }

    /// Default environment applied to every command.
    pub fn default_env(&self) -> &Env {
        self.launcher.env()
    }

    pub fn launcher(&self) -> &CommandLauncher {
        &self.launcher
    }

    /// Start a command without waiting for it.
    pub async fn start(&self, cmd: Cmd) -> Result<RemoteProcess> {
        self.launcher.start(cmd).await
    }

    /// Run a command to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit is reported in the returned status, not as an error.
    /// A command still running when the device command timeout expires is
    /// killed and [`Error::CommandTimeout`] is returned.
    pub async fn output(&self, cmd: Cmd) -> Result<CommandOutput> {
        let deadline = Instant::now() + self.command_timeout;
        let (stdout_writer, stdout_reader) = tokio::io::duplex(crate::pump::BUFFER_SIZE);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(crate::pump::BUFFER_SIZE);
        let cmd = cmd.stdout(stdout_writer).stderr(stderr_writer);

        let process = match tokio::time::timeout_at(deadline, self.launcher.start(cmd)).await {
            Ok(process) => process?,
            Err(_) => return Err(Error::CommandTimeout(self.command_timeout)),
        };
        let command = process.command().to_string();
        let killer = process.kill_handle();

        let collect = async {
            let (status, stdout, stderr) = tokio::join!(
                process.wait(),
                read_all(stdout_reader),
                read_all(stderr_reader)
            );
            Ok::<_, Error>(CommandOutput {
                status: status?,
                stdout: stdout?,
                stderr: stderr?,
            })
        };
        tokio::pin!(collect);

        tokio::select! {
            result = &mut collect => result,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    "`{}` still running after {:?}, killing it",
                    command,
                    self.command_timeout
                );
                killer.kill();
                // Keep waiting briefly so the kill is sent and the exit observed.
                if tokio::time::timeout(KILL_GRACE, &mut collect).await.is_err() {
                    tracing::debug!("`{}` did not exit within {:?} of kill", command, KILL_GRACE);
                }
                Err(Error::CommandTimeout(self.command_timeout))
            }
        }
    }

    /// Run a command and return its trimmed stdout.
    ///
    /// A non-zero exit becomes [`Error::CommandFailed`] carrying the output.
    pub async fn call(&self, cmd: Cmd) -> Result<String> {
        let command = self.launcher.command_line(&cmd);
        let output = self.output(cmd).await?;
        let stdout = output.stdout_lossy();
        if !output.success() {
            return Err(Error::CommandFailed {
                command,
                status: output.status,
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout.trim().to_string())
    }

    /// Run a command, discarding its output.
    pub async fn run(&self, cmd: Cmd) -> Result<()> {
        self.call(cmd).await.map(|_| ())
    }

    /// Forward an ephemeral local port to `remote_port` until `shutdown` completes.
    pub async fn setup_local_port<F>(&self, remote_port: u16, shutdown: F) -> Result<u16>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tunnels.setup_local_port(remote_port, shutdown).await
    }

    /// Forward an ephemeral local port to `remote_port` until the handle is stopped.
    pub async fn forward_port(&self, remote_port: u16) -> Result<ForwardHandle> {
        self.tunnels.forward(remote_port).await
    }
}

async fn read_all(mut reader: tokio::io::DuplexStream) -> std::io::Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_classes() {
        assert!(RemoteOs::Linux.is_posix());
        assert!(RemoteOs::Macos.is_posix());
        assert!(!RemoteOs::Windows.is_posix());
        assert!(!RemoteOs::Unknown.is_posix());
    }

    #[test]
    fn os_deserializes_from_lowercase_names() {
        let os: RemoteOs = serde_yaml::from_str("osx").unwrap();
        assert_eq!(os, RemoteOs::Macos);
        let os: RemoteOs = serde_yaml::from_str("windows").unwrap();
        assert_eq!(os, RemoteOs::Windows);
        assert_eq!(RemoteOs::default(), RemoteOs::Linux);
    }
}
