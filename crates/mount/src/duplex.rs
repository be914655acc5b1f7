use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::{MountError, Result};

/// Joins a separate reader and writer into one bidirectional stream.
///
/// Used to treat a child's stdout/stdin pair as the SFTP channel.
#[derive(Debug)]
pub struct Duplex<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Duplex<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R, W> Duplex<R, W>
where
    W: AsyncWrite + Unpin,
{
    /// Close both halves: flush and shut down the writer, then release the
    /// reader.
    ///
    /// Every step runs even after a failure, and all failures are returned
    /// together.
    pub async fn close(mut self) -> Result<()> {
        let mut failures = Vec::new();
        if let Err(e) = self.writer.flush().await {
            failures.push(e);
        }
        if let Err(e) = self.writer.shutdown().await {
            failures.push(e);
        }
        drop(self.reader);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MountError::ChannelClose(failures))
        }
    }
}

impl<R, W> AsyncRead for Duplex<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for Duplex<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
