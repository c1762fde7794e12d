// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! HTTP/1.1 chunked transfer encoding for streamed frames

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::hub::FrameSink;

/// Writes each frame as one HTTP chunk and flushes it immediately.
///
/// The optional response head goes out when the hub opens the sink, and the
/// terminating zero-length chunk when the hub closes it.
pub struct ChunkedWriter<W> {
    inner: W,
    head: Option<&'static [u8]>,
}

impl<W> ChunkedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(inner: W) -> Self {
        Self { inner, head: None }
    }

    /// Send `head` (status line and headers) before the first chunk
    pub fn with_head(mut self, head: &'static [u8]) -> Self {
        self.head = Some(head);
        self
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> FrameSink for ChunkedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn open(&mut self) -> io::Result<()> {
        if let Some(head) = self.head.take() {
            self.inner.write_all(head).await?;
            self.inner.flush().await?;
        }
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        // An empty chunk would end the response body
        if frame.is_empty() {
            return Ok(());
        }

        let mut chunk = Vec::with_capacity(frame.len() + 12);
        chunk.extend_from_slice(format!("{:x}\r\n", frame.len()).as_bytes());
        chunk.extend_from_slice(frame);
        chunk.extend_from_slice(b"\r\n");

        self.inner.write_all(&chunk).await?;
        self.inner.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.write_all(b"0\r\n\r\n").await?;
        self.inner.flush().await?;
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_frame_becomes_one_chunk() {
        let (client, mut server) = duplex(1024);
        let mut writer = ChunkedWriter::new(client).with_head(b"HTTP/1.1 200 OK\r\n\r\n");
        let frame = b"{\"type\":\"scored\",\"team\":\"yellow\"}\r\n";

        writer.open().await.unwrap();
        writer.write_frame(frame).await.unwrap();
        writer.close().await.unwrap();
        drop(writer);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();

        let mut expected = b"HTTP/1.1 200 OK\r\n\r\n23\r\n".to_vec();
        expected.extend_from_slice(frame);
        expected.extend_from_slice(b"\r\n0\r\n\r\n");
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_open_without_head_writes_nothing() {
        let (client, mut server) = duplex(64);
        let mut writer = ChunkedWriter::new(client);

        writer.open().await.unwrap();
        writer.write_frame(b"").await.unwrap();
        drop(writer);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_closed_peer_fails_write() {
        let (client, server) = duplex(64);
        let mut writer = ChunkedWriter::new(client);
        drop(server);

        assert!(writer.write_frame(b"{}\r\n").await.is_err());
    }
}
