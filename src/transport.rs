// ABOUTME: Transport capability consumed by the command launcher and tunnels.
// ABOUTME: Abstracts execution channels and remote TCP dialing over a shared connection.

use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed readable end of a pipe.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writable end of a pipe.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A bidirectional byte stream, such as a dialed remote socket.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// Boxed bidirectional stream.
pub type BoxStream = Box<dyn Stream>;

/// A shared connection to a remote host.
///
/// Implementations must allow channels and dials to be opened concurrently
/// from many tasks without external locking.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new logical execution channel.
    async fn open_channel(&self) -> Result<Box<dyn ExecChannel>, TransportError>;

    /// Dial a TCP port on the remote host.
    async fn dial(&self, port: u16) -> Result<BoxStream, TransportError>;
}

/// One remote command session multiplexed over a [`Transport`].
///
/// Pipes must be requested before [`ExecChannel::start`]; each pipe can be
/// taken at most once. Pipes that are never taken are left unwired.
#[async_trait]
pub trait ExecChannel: Send + Sync {
    /// Writable end connected to the remote process stdin.
    fn stdin_pipe(&mut self) -> Result<BoxWriter, TransportError>;

    /// Readable end connected to the remote process stdout.
    fn stdout_pipe(&mut self) -> Result<BoxReader, TransportError>;

    /// Readable end connected to the remote process stderr.
    fn stderr_pipe(&mut self) -> Result<BoxReader, TransportError>;

    /// Start the given command line on the remote shell.
    async fn start(&mut self, command: &str) -> Result<(), TransportError>;

    /// Deliver a signal to the running command.
    async fn signal(&self, signal: Signal) -> Result<(), TransportError>;

    /// Wait for the remote command to exit.
    ///
    /// Must be cancel safe: a `wait` future dropped before completion loses
    /// nothing, and a later call still observes the exit.
    async fn wait(&mut self) -> Result<ExitStatus, TransportError>;
}

/// Signals that can be delivered to a remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Kill,
}

impl Signal {
    /// Signal name without the `SIG` prefix.
    pub fn name(self) -> &'static str {
        match self {
            Signal::Kill => "KILL",
        }
    }
}

/// How a remote command terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited with this code.
    Code(u32),
    /// The command was terminated by the named signal.
    Signal(String),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    /// Exit code, if the command exited normally.
    pub fn code(&self) -> Option<u32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(name) => write!(f, "killed by signal {}", name),
        }
    }
}

/// Errors raised by a transport or one of its channels.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    #[error("failed to dial remote port {port}: {reason}")]
    Dial { port: u16, reason: String },

    #[error("failed to start command: {0}")]
    Start(String),

    #[error("failed to deliver signal {signal:?}: {reason}")]
    Signal { signal: Signal, reason: String },

    #[error("{0} pipe already taken")]
    PipeTaken(&'static str),

    #[error("channel already started")]
    AlreadyStarted,

    #[error("channel not started")]
    NotStarted,

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
