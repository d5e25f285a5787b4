// ABOUTME: Execution channel over a russh session channel.
// ABOUTME: A driver task bridges channel messages to in-memory stdio pipes.

use crate::pump::BUFFER_SIZE;
use crate::transport::{BoxReader, BoxWriter, ExecChannel, ExitStatus, Signal, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};

/// Capacity of each in-memory stdio pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

type ExitResult = Result<ExitStatus, TransportError>;

/// Driver-side ends of the stdio pipes.
#[derive(Default)]
struct DriverPipes {
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
}

/// An SSH session channel used to run one command.
pub(crate) struct SshExecChannel {
    /// Present until the command is started.
    channel: Mutex<Option<Channel<Msg>>>,
    pipes: DriverPipes,
    control: Option<mpsc::Sender<Signal>>,
    exit: Mutex<Option<oneshot::Receiver<ExitResult>>>,
}

impl SshExecChannel {
    pub(crate) fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel: Mutex::new(Some(channel)),
            pipes: DriverPipes::default(),
            control: None,
            exit: Mutex::new(None),
        }
    }

    fn ensure_not_started(&mut self) -> Result<(), TransportError> {
        if self.channel.get_mut().is_none() {
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

#[async_trait]
impl ExecChannel for SshExecChannel {
    fn stdin_pipe(&mut self) -> Result<BoxWriter, TransportError> {
        self.ensure_not_started()?;
        Ok(Box::new(take_pipe(&mut self.pipes.stdin, "stdin")?))
    }

    fn stdout_pipe(&mut self) -> Result<BoxReader, TransportError> {
        self.ensure_not_started()?;
        Ok(Box::new(take_pipe(&mut self.pipes.stdout, "stdout")?))
    }

    fn stderr_pipe(&mut self) -> Result<BoxReader, TransportError> {
        self.ensure_not_started()?;
        Ok(Box::new(take_pipe(&mut self.pipes.stderr, "stderr")?))
    }

    async fn start(&mut self, command: &str) -> Result<(), TransportError> {
        let channel = self
            .channel
            .get_mut()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| TransportError::Start(e.to_string()))?;

        // Without a stdin pipe the remote side reads an empty input.
        if self.pipes.stdin.is_none() {
            channel
                .eof()
                .await
                .map_err(|e| TransportError::Start(e.to_string()))?;
        }

        let (control_tx, control_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = oneshot::channel();
        let pipes = std::mem::take(&mut self.pipes);
        tokio::spawn(drive(channel, pipes, control_rx, exit_tx));

        self.control = Some(control_tx);
        *self.exit.get_mut() = Some(exit_rx);
        Ok(())
    }

    async fn signal(&self, signal: Signal) -> Result<(), TransportError> {
        let control = self.control.as_ref().ok_or(TransportError::NotStarted)?;
        control
            .send(signal)
            .await
            .map_err(|_| TransportError::Signal {
                signal,
                reason: "channel already closed".to_string(),
            })
    }

    async fn wait(&mut self) -> Result<ExitStatus, TransportError> {
        let exit = self
            .exit
            .get_mut()
            .as_mut()
            .ok_or(TransportError::NotStarted)?;
        // The receiver stays in place until it yields, so a cancelled wait
        // can be retried.
        let result = exit.await;
        *self.exit.get_mut() = None;
        match result {
            Ok(result) => result,
            Err(_) => Err(TransportError::ChannelClosed),
        }
    }
}

fn to_sig(signal: Signal) -> Sig {
    match signal {
        Signal::Kill => Sig::KILL,
    }
}

fn signal_name(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

/// Read from the stdin pipe, or never complete once it is gone.
async fn read_stdin(stdin: &mut Option<DuplexStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stdin {
        Some(stdin) => stdin.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Write to an output pipe; a pipe whose reader went away is dropped.
async fn write_output(pipe: &mut Option<DuplexStream>, data: &[u8]) {
    if let Some(out) = pipe.as_mut()
        && let Err(e) = out.write_all(data).await
    {
        tracing::debug!("dropping remote output: {}", e);
        *pipe = None;
    }
}

/// Run the channel until the command exits, relaying stdio and signals.
async fn drive(
    mut channel: Channel<Msg>,
    mut pipes: DriverPipes,
    mut control: mpsc::Receiver<Signal>,
    exit: oneshot::Sender<ExitResult>,
) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut status: Option<ExitStatus> = None;
    let mut got_eof = false;
    let mut rejected = false;

    loop {
        tokio::select! {
            r = read_stdin(&mut pipes.stdin, &mut buf) => {
                match r {
                    Ok(0) => {
                        pipes.stdin = None;
                        let _ = channel.eof().await;
                    }
                    Ok(n) => {
                        if let Err(e) = channel.data(&buf[..n]).await {
                            tracing::debug!("channel data error: {}", e);
                            pipes.stdin = None;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("stdin pipe read error: {}", e);
                        pipes.stdin = None;
                        let _ = channel.eof().await;
                    }
                }
            }

            Some(signal) = control.recv() => {
                if let Err(e) = channel.signal(to_sig(signal)).await {
                    tracing::debug!("failed to send {:?}: {}", signal, e);
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        write_output(&mut pipes.stdout, data).await;
                    }
                    Some(ChannelMsg::ExtendedData { ref data, ext }) => {
                        if ext == 1 {
                            write_output(&mut pipes.stderr, data).await;
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        status = Some(ExitStatus::Code(exit_status));
                        if got_eof {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExitSignal { signal_name: ref sig, .. }) => {
                        status = Some(ExitStatus::Signal(signal_name(sig)));
                        if got_eof {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) => {
                        got_eof = true;
                        // Closing the pipes lets the output relays finish.
                        pipes.stdout = None;
                        pipes.stderr = None;
                        if status.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Failure) => {
                        rejected = true;
                        break;
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    drop(pipes);
    let result = match status {
        Some(status) => Ok(status),
        None if rejected => Err(TransportError::Start(
            "remote side rejected the command".to_string(),
        )),
        None => Err(TransportError::ChannelClosed),
    };
    let _ = exit.send(result);
}
