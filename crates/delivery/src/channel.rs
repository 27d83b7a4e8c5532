//! Caller-facing response channels.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Metadata sent before the first body chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub content_type: String,
    pub content_length: u64,
    /// Set for attachment transfers.
    pub attachment_filename: Option<String>,
}

impl ResponseHead {
    /// `Content-Disposition` value for this head.
    pub fn content_disposition(&self) -> String {
        match &self.attachment_filename {
            Some(name) => format!("attachment; filename=\"{name}\""),
            None => "inline".to_string(),
        }
    }
}

/// The active response to the caller.
///
/// A write error means the caller went away.
#[async_trait]
pub trait ResponseChannel: Send {
    async fn begin(&mut self, head: ResponseHead) -> io::Result<()>;

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Flush everything written so far. The transfer is complete only once this succeeds.
    async fn finish(&mut self) -> io::Result<()>;
}

/// Response channel over any tokio writer (files, stdout, buffers).
#[derive(Debug)]
pub struct WriterChannel<W> {
    writer: W,
    head: Option<ResponseHead>,
    written: u64,
    finished: bool,
}

impl<W> WriterChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            head: None,
            written: 0,
            finished: false,
        }
    }

    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> ResponseChannel for WriterChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn begin(&mut self, head: ResponseHead) -> io::Result<()> {
        if self.head.is_some() {
            return Err(io::Error::other("response already started"));
        }
        tracing::debug!(
            content_type = %head.content_type,
            content_length = head.content_length,
            disposition = %head.content_disposition(),
            "Response started"
        );
        self.head = Some(head);
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.head.is_none() {
            return Err(io::Error::other("write before begin"));
        }
        self.writer.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.finished = true;
        Ok(())
    }
}
