// ABOUTME: Test support utilities.
// ABOUTME: Provides a transport that runs commands with the local shell.

#[allow(dead_code)]
pub mod ssh_server;

use async_trait::async_trait;
use remsh::transport::{
    BoxReader, BoxStream, BoxWriter, ExecChannel, ExitStatus, Signal, Transport, TransportError,
};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tokio::io::DuplexStream;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

static TRACING_INIT: Once = Once::new();

const PIPE_CAPACITY: usize = 64 * 1024;

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("remsh=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Transport whose "remote host" is this machine.
///
/// Commands run under `sh -c` and dials connect to 127.0.0.1.
#[derive(Default)]
pub struct LocalTransport {
    channels_opened: AtomicUsize,
    dials: AtomicUsize,
}

#[allow(dead_code)]
impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of execution channels opened so far.
    pub fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::SeqCst)
    }

    /// Number of dial attempts so far.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open_channel(&self) -> Result<Box<dyn ExecChannel>, TransportError> {
        self.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LocalChannel::default()))
    }

    async fn dial(&self, port: u16) -> Result<BoxStream, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|e| TransportError::Dial {
                port,
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }
}

#[derive(Default)]
struct LocalChannel {
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    child: Option<Child>,
    pid: Option<u32>,
}

impl LocalChannel {
    fn ensure_not_started(&self) -> Result<(), TransportError> {
        if self.child.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        Ok(())
    }
}

fn take_pipe(
    slot: &mut Option<DuplexStream>,
    name: &'static str,
) -> Result<DuplexStream, TransportError> {
    if slot.is_some() {
        return Err(TransportError::PipeTaken(name));
    }
    let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
    *slot = Some(ours);
    Ok(theirs)
}

fn stdio_for(pipe: &Option<DuplexStream>) -> Stdio {
    if pipe.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

#[async_trait]
impl ExecChannel for LocalChannel {
    fn stdin_pipe(&mut self) -> Result<BoxWriter, TransportError> {
        self.ensure_not_started()?;
        Ok(Box::new(take_pipe(&mut self.stdin, "stdin")?))
    }

    fn stdout_pipe(&mut self) -> Result<BoxReader, TransportError> {
        self.ensure_not_started()?;
        Ok(Box::new(take_pipe(&mut self.stdout, "stdout")?))
    }

    fn stderr_pipe(&mut self) -> Result<BoxReader, TransportError> {
        self.ensure_not_started()?;
        Ok(Box::new(take_pipe(&mut self.stderr, "stderr")?))
    }

    async fn start(&mut self, command: &str) -> Result<(), TransportError> {
        self.ensure_not_started()?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(stdio_for(&self.stdin))
            .stdout(stdio_for(&self.stdout))
            .stderr(stdio_for(&self.stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Start(e.to_string()))?;

        if let (Some(mut input), Some(mut pipe)) = (self.stdin.take(), child.stdin.take()) {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut input, &mut pipe).await;
            });
        }
        if let (Some(mut output), Some(mut pipe)) = (self.stdout.take(), child.stdout.take()) {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut pipe, &mut output).await;
            });
        }
        if let (Some(mut output), Some(mut pipe)) = (self.stderr.take(), child.stderr.take()) {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut pipe, &mut output).await;
            });
        }

        self.pid = child.id();
        self.child = Some(child);
        Ok(())
    }

    async fn signal(&self, signal: Signal) -> Result<(), TransportError> {
        let pid = self.pid.ok_or(TransportError::NotStarted)?;
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!("kill -s {} {}", signal.name(), pid))
            .status()
            .await
            .map_err(|e| TransportError::Signal {
                signal,
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(TransportError::Signal {
                signal,
                reason: format!("kill exited with {status}"),
            });
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitStatus, TransportError> {
        let child = self.child.as_mut().ok_or(TransportError::NotStarted)?;
        let status = child.wait().await.map_err(TransportError::Io)?;

        if let Some(code) = status.code() {
            return Ok(ExitStatus::Code(code as u32));
        }
        let name = match status.signal() {
            Some(1) => "HUP".to_string(),
            Some(2) => "INT".to_string(),
            Some(9) => "KILL".to_string(),
            Some(15) => "TERM".to_string(),
            Some(other) => other.to_string(),
            None => return Err(TransportError::ChannelClosed),
        };
        Ok(ExitStatus::Signal(name))
    }
}
