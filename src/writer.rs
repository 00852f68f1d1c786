//! Dedicated writer task for line-delimited pipes.
//!
//! Every outbound message goes through an mpsc channel to a single writer
//! task, so concurrent handlers never interleave partial lines. The task
//! batches whatever is queued into one vectored write.
//!
//! # Architecture
//!
//! ```text
//! Caller    ─┐
//! Handler 1 ─┼─► mpsc::Sender<OutboundLine> ─► Writer Task ─► Pipe
//! Handler N ─┘
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::error::{IpcError, Result};
use crate::handler::BoxFuture;
use crate::transport::Transport;

/// Maximum lines to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

const NEWLINE: &[u8] = b"\n";

/// A line ready to be written to the pipe, without its terminator.
#[derive(Debug)]
pub struct OutboundLine {
    /// Line text.
    pub line: Bytes,
}

impl OutboundLine {
    /// Create an outbound line.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` if the text contains a newline.
    pub fn new(text: String) -> Result<Self> {
        if text.contains('\n') {
            return Err(IpcError::Encoding(
                "a line pipe cannot carry a message containing a newline".to_string(),
            ));
        }
        Ok(Self {
            line: Bytes::from(text),
        })
    }

    /// Bytes on the wire, terminator included.
    #[inline]
    pub fn size(&self) -> usize {
        self.line.len() + NEWLINE.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the line queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending lines to the writer task.
///
/// This is cheaply cloneable and can be shared across handlers.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundLine>,
    /// Lines queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundLine>, pending: Arc<AtomicUsize>) -> Self {
        Self { tx, pending }
    }

    /// Queue one line. Waits while the channel is full.
    pub async fn send_line(&self, line: OutboundLine) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(line).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            IpcError::ConnectionClosed
        })
    }

    /// Get current pending line count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl Transport for WriterHandle {
    fn send(&self, message: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let line = OutboundLine::new(message)?;
            self.send_line(line).await
        })
    }
}

/// Spawn the writer task and return a handle for sending lines.
///
/// The task ends cleanly once every handle is dropped, or with an error
/// when the pipe fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone());
    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, pending).await;
        if let Err(e) = &result {
            tracing::error!("Writer task error: {}", e);
        }
        result
    });

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundLine>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch_size, Ordering::Release);
    }

    Ok(())
}

/// Write a batch of lines with `write_vectored`, resuming after partial
/// writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundLine::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(IpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the slice list for what is left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundLine], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for line in batch {
        for part in [&line.line[..], NEWLINE] {
            let end = offset + part.len();
            if skip_bytes < end && !part.is_empty() {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn line(text: &str) -> OutboundLine {
        OutboundLine::new(text.to_string()).unwrap()
    }

    #[test]
    fn test_outbound_line_size() {
        assert_eq!(line("hello").size(), 6);
        assert_eq!(line("").size(), 1);
    }

    #[test]
    fn test_outbound_line_rejects_newline() {
        let result = OutboundLine::new("a\nb".to_string());
        assert!(matches!(result, Err(IpcError::Encoding(_))));
    }

    #[tokio::test]
    async fn test_writer_appends_newline() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        Transport::send(&handle, "ipc://ping?seq=1".to_string())
            .await
            .unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ipc://ping?seq=1\n");
    }

    #[tokio::test]
    async fn test_transport_rejects_newline() {
        let (client, _server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        let result = Transport::send(&handle, "b5\x00\n".to_string()).await;
        assert!(matches!(result, Err(IpcError::Encoding(_))));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_batching_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        for i in 0..10 {
            handle.send_line(line(&format!("m{i}"))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut buf = vec![0u8; 1024];
        let n = server.read(&mut buf).await.unwrap();
        let expected: String = (0..10).map(|i| format!("m{i}\n")).collect();
        assert_eq!(std::str::from_utf8(&buf[..n]).unwrap(), expected);
        assert_eq!(handle.pending_count(), 0);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![line("hello")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_line() {
        let batch = vec![line("hello"), line("abc")];
        let slices = build_remaining_slices(&batch, 2);

        assert_eq!(slices.len(), 4);
        assert_eq!(&slices[0][..], b"llo");
        assert_eq!(&slices[1][..], b"\n");
        assert_eq!(&slices[2][..], b"abc");
    }

    #[test]
    fn test_build_remaining_slices_skip_first_line() {
        let batch = vec![line("hello"), line("abc")];
        let slices = build_remaining_slices(&batch, 6);

        assert_eq!(slices.len(), 2);
        assert_eq!(&slices[0][..], b"abc");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| line("abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner(), b"abc\n".repeat(5));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_after_task_ends() {
        let (client, server) = duplex(16);
        let (handle, task) = spawn_writer_task_default(client);
        drop(server);

        let _ = handle.send_line(line("first")).await;
        let _ = task.await;

        let result = handle.send_line(line("second")).await;
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }
}
