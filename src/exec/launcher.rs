// ABOUTME: Starts remote commands on fresh execution channels.
// ABOUTME: Composes the shell command line and wires stdio through relay tasks.

use super::cmd::{Cmd, quote};
use super::env::Env;
use super::process::RemoteProcess;
use crate::error::Result;
use crate::pump::pump;
use crate::transport::Transport;
use std::sync::Arc;

/// Launches commands over a shared transport.
///
/// Every command gets the launcher's default environment, overridden by the
/// command's own entries.
#[derive(Clone)]
pub struct CommandLauncher {
    transport: Arc<dyn Transport>,
    env: Env,
}

impl std::fmt::Debug for CommandLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLauncher")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl CommandLauncher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            env: Env::new(),
        }
    }

    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    /// Default environment applied to every command.
    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn set_env(&mut self, env: Env) {
        self.env = env;
    }

    /// Compose the literal string sent to the remote shell:
    /// `[cd DIR; ][KEY=VAL ]...NAME ARG...`.
    pub fn command_line(&self, cmd: &Cmd) -> String {
        let mut line = String::new();

        if let Some(dir) = cmd.dir.as_deref().filter(|d| !d.is_empty()) {
            line.push_str("cd ");
            line.push_str(&quote(dir));
            line.push_str("; ");
        }

        for (key, value) in self.env.merged(&cmd.env).iter() {
            line.push_str(key);
            line.push('=');
            line.push_str(&quote(value));
            line.push(' ');
        }

        line.push_str(&cmd.to_string());
        line
    }

    /// Start `cmd` on a new execution channel.
    ///
    /// Nothing is relayed unless the remote side accepted the command.
    pub async fn start(&self, mut cmd: Cmd) -> Result<RemoteProcess> {
        let command = self.command_line(&cmd);
        let mut channel = self.transport.open_channel().await?;

        let stdin = match cmd.stdin.take() {
            Some(input) => Some((input, channel.stdin_pipe()?)),
            None => None,
        };
        let stdout = match cmd.stdout.take() {
            Some(output) => Some((channel.stdout_pipe()?, output)),
            None => None,
        };
        let stderr = match cmd.stderr.take() {
            Some(output) => Some((channel.stderr_pipe()?, output)),
            None => None,
        };

        tracing::debug!("starting remote command: {}", command);
        channel.start(&command).await?;

        // stdin is not part of the wait barrier: a source that never ends
        // must not keep wait() from returning.
        if let Some((input, pipe)) = stdin {
            let name = cmd.name.clone();
            tokio::spawn(async move {
                if let Err(e) = pump(input, pipe).await {
                    tracing::debug!("stdin relay for `{}` failed: {}", name, e);
                }
            });
        }

        let relays = [stdout, stderr]
            .into_iter()
            .flatten()
            .map(|(pipe, output)| tokio::spawn(pump(pipe, output)))
            .collect();

        Ok(RemoteProcess::new(command, channel, relays))
    }
}
