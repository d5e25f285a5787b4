// ABOUTME: Handle to a running remote command.
// ABOUTME: Waits for exit and for every stdout/stderr relay before returning.

use crate::error::Result;
use crate::transport::{ExecChannel, ExitStatus, Signal};
use futures::future::join_all;
use std::io;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A command started by [`CommandLauncher::start`](super::CommandLauncher::start).
pub struct RemoteProcess {
    command: String,
    channel: Box<dyn ExecChannel>,
    relays: Vec<JoinHandle<io::Result<u64>>>,
    kill: Arc<Notify>,
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("command", &self.command)
            .field("relays", &self.relays.len())
            .finish()
    }
}

/// Requests a kill of a [`RemoteProcess`] from another task, including
/// while [`RemoteProcess::wait`] is pending.
///
/// The signal is sent by the task running `wait`. A kill requested before
/// `wait` starts is delivered as soon as it does.
#[derive(Debug, Clone)]
pub struct KillHandle {
    notify: Arc<Notify>,
}

impl KillHandle {
    pub fn kill(&self) {
        self.notify.notify_one();
    }
}

impl RemoteProcess {
    pub(crate) fn new(
        command: String,
        channel: Box<dyn ExecChannel>,
        relays: Vec<JoinHandle<io::Result<u64>>>,
    ) -> Self {
        Self {
            command,
            channel,
            relays,
            kill: Arc::new(Notify::new()),
        }
    }

    /// The command line sent to the remote shell.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Send a kill signal to the remote process. Does not wait for it to exit.
    pub async fn kill(&self) -> Result<()> {
        self.channel.signal(Signal::Kill).await?;
        Ok(())
    }

    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            notify: Arc::clone(&self.kill),
        }
    }

    /// Wait for the remote process to exit and for its output to be relayed.
    ///
    /// A non-zero exit is returned as a status, not an error. Errors are
    /// reserved for the channel closing without reporting an exit.
    pub async fn wait(mut self) -> Result<ExitStatus> {
        let status = loop {
            tokio::select! {
                status = self.channel.wait() => break status,
                _ = self.kill.notified() => {
                    tracing::debug!("killing `{}`", self.command);
                    if let Err(e) = self.channel.signal(Signal::Kill).await {
                        tracing::debug!("kill of `{}` not delivered: {}", self.command, e);
                    }
                }
            }
        };

        for relay in join_all(self.relays.drain(..)).await {
            match relay {
                Ok(Ok(bytes)) => tracing::trace!("relay finished after {} bytes", bytes),
                Ok(Err(e)) => tracing::debug!("output relay for `{}` failed: {}", self.command, e),
                Err(e) => tracing::debug!("output relay for `{}` panicked: {}", self.command, e),
            }
        }

        Ok(status?)
    }
}
