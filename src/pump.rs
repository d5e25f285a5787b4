// ABOUTME: One-directional byte relay between a reader and a writer.
// ABOUTME: Shared by stdio wiring and tunnel forwarding.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Relay buffer size.
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Copy bytes from `src` to `dst` until `src` reaches end-of-data.
///
/// The write side of `dst` is shut down whether the copy succeeds or fails.
/// A destination that stops accepting bytes mid-chunk is reported as
/// [`io::ErrorKind::WriteZero`]. Returns the number of bytes relayed.
pub async fn pump<R, W>(mut src: R, mut dst: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    let result = loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        };
        if let Err(e) = dst.write_all(&buf[..n]).await {
            break Err(e);
        }
        total += n as u64;
    };

    match result {
        Ok(total) => {
            dst.shutdown().await?;
            Ok(total)
        }
        Err(e) => {
            let _ = dst.shutdown().await;
            Err(e)
        }
    }
}
