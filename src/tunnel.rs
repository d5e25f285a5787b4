// ABOUTME: Local TCP port forwarding to remote ports over the shared transport.
// ABOUTME: Each accepted connection is relayed by a pair of independent pumps.

use crate::error::Result;
use crate::pump::pump;
use crate::transport::{BoxStream, Transport};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Forwards local TCP listeners to remote ports.
#[derive(Clone)]
pub struct TunnelManager {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager").finish_non_exhaustive()
    }
}

impl TunnelManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Listen on an ephemeral local port and forward every connection to
    /// `remote_port` on the remote host.
    ///
    /// Returns the local port once the listener is bound. The listener
    /// closes when `shutdown` completes; tunnels that are already open keep
    /// running until either side closes them.
    pub async fn setup_local_port<F>(&self, remote_port: u16, shutdown: F) -> Result<u16>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_port = listener.local_addr()?.port();

        tokio::spawn(accept_loop(
            incoming(listener),
            Arc::clone(&self.transport),
            remote_port,
            shutdown,
        ));

        tracing::debug!(
            "forwarding 127.0.0.1:{} to remote port {}",
            local_port,
            remote_port
        );
        Ok(local_port)
    }

    /// Like [`setup_local_port`](Self::setup_local_port), returning a handle
    /// that stops the listener when stopped or dropped.
    pub async fn forward(&self, remote_port: u16) -> Result<ForwardHandle> {
        let (tx, rx) = oneshot::channel::<()>();
        let local_port = self
            .setup_local_port(remote_port, async move {
                // Either an explicit stop or the handle being dropped.
                let _ = rx.await;
            })
            .await?;
        Ok(ForwardHandle {
            local_port,
            remote_port,
            shutdown: Some(tx),
        })
    }
}

/// Handle for a forwarded local port.
#[derive(Debug)]
pub struct ForwardHandle {
    local_port: u16,
    remote_port: u16,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ForwardHandle {
    /// Local port accepting connections.
    pub fn port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Stop accepting new connections. Open tunnels are not interrupted.
    pub fn stop(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ForwardHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accepted connections of `listener`. The listener closes when the stream
/// is dropped.
fn incoming(listener: TcpListener) -> impl Stream<Item = io::Result<(TcpStream, SocketAddr)>> {
    futures::stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await;
        Some((accepted, listener))
    })
}

/// Accept local connections until the listener fails or `shutdown` completes.
///
/// The listener and `shutdown` are both dropped when the loop ends,
/// whichever way it ends.
async fn accept_loop<S, F>(
    incoming: S,
    transport: Arc<dyn Transport>,
    remote_port: u16,
    shutdown: F,
) where
    S: Stream<Item = io::Result<(TcpStream, SocketAddr)>>,
    F: Future<Output = ()>,
{
    tokio::pin!(incoming);
    tokio::pin!(shutdown);

    loop {
        let accept_result = tokio::select! {
            result = incoming.next() => match result {
                Some(result) => result,
                None => break,
            },
            _ = &mut shutdown => {
                tracing::debug!("tunnel listener for remote port {} stopped", remote_port);
                break;
            }
        };

        match accept_result {
            Ok((local, peer)) => {
                tracing::debug!("accepted tunnel connection from {}", peer);
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    tunnel(local, transport.as_ref(), remote_port).await;
                });
            }
            Err(e) => {
                tracing::warn!("accept error on tunnel listener: {}", e);
                break;
            }
        }
    }
}

/// Dial the remote side for one accepted connection and relay until done.
///
/// A failed dial closes only this connection.
async fn tunnel(mut local: TcpStream, transport: &dyn Transport, remote_port: u16) {
    let remote = match transport.dial(remote_port).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::debug!("tunnel dial failed: {}", e);
            let _ = local.shutdown().await;
            return;
        }
    };
    forward_pair(local, remote).await;
}

/// Relay both directions of a tunnel pair; both sockets are closed only once
/// both directions have finished.
async fn forward_pair(local: TcpStream, remote: BoxStream) {
    let (local_read, local_write) = tokio::io::split(local);
    let (remote_read, remote_write) = tokio::io::split(remote);

    let outbound = tokio::spawn(async move {
        let mut local_read = local_read;
        let mut remote_write = remote_write;
        if let Err(e) = pump(&mut local_read, &mut remote_write).await {
            tracing::debug!("tunnel local->remote copy error: {}", e);
        }
        (local_read, remote_write)
    });
    let inbound = tokio::spawn(async move {
        let mut remote_read = remote_read;
        let mut local_write = local_write;
        if let Err(e) = pump(&mut remote_read, &mut local_write).await {
            tracing::debug!("tunnel remote->local copy error: {}", e);
        }
        (remote_read, local_write)
    });

    // Supervisor: the halves are reunited and dropped together.
    let (outbound, inbound) = tokio::join!(outbound, inbound);
    if let (Ok((local_read, remote_write)), Ok((remote_read, local_write))) = (outbound, inbound) {
        let local = local_read.unsplit(local_write);
        let remote = remote_read.unsplit(remote_write);
        drop(local);
        drop(remote);
    }
    tracing::debug!("tunnel pair closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ExecChannel, TransportError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn open_channel(&self) -> std::result::Result<Box<dyn ExecChannel>, TransportError> {
            Err(TransportError::ChannelOpen("unused".to_string()))
        }

        async fn dial(&self, port: u16) -> std::result::Result<BoxStream, TransportError> {
            Err(TransportError::Dial {
                port,
                reason: "unused".to_string(),
            })
        }
    }

    /// Test: the listener fails on accept while shutdown is still pending.
    /// Expected: the loop ends and drops the shutdown future with it.
    #[tokio::test]
    async fn accept_error_releases_shutdown_future() {
        let (guard, released) = oneshot::channel::<()>();
        let shutdown = async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        };
        let failing = futures::stream::iter(vec![Err::<(TcpStream, SocketAddr), _>(
            io::Error::other("listener broken"),
        )]);

        tokio::time::timeout(
            Duration::from_secs(5),
            accept_loop(failing, Arc::new(NoTransport), 9, shutdown),
        )
        .await
        .expect("accept loop should end on accept error");

        assert!(released.await.is_err(), "shutdown future is still alive");
    }

    /// Test: complete the shutdown future while no connection is pending.
    /// Expected: the loop ends.
    #[tokio::test]
    async fn shutdown_ends_accept_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            accept_loop(incoming(listener), Arc::new(NoTransport), 9, async {}),
        )
        .await
        .expect("accept loop should end on shutdown");
    }
}
