//! Line and length-prefixed blob framing
//!
//! Every message on the wire is built from two primitives:
//! - a line: UTF-8 text terminated by `\n`
//! - a blob: a decimal byte length on its own line, followed by exactly that
//!   many raw bytes (binary-safe, may contain `\n` and `\0`)
//!
//! The free functions work on any tokio reader/writer so the same framing can
//! encode nested payloads into a `Vec<u8>`; `WireStream` binds them to a socket.

use std::str::FromStr;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream,
};

use crate::error::ProtocolError;

/// Longest accepted line, excluding the terminator
pub const MAX_LINE_BYTES: usize = 4096;

/// Default ceiling for a single blob
pub const DEFAULT_MAX_BLOB_BYTES: usize = 64 * 1024 * 1024;

/// Read one `\n`-terminated line, without the terminator.
pub async fn read_line<R>(reader: &mut R) -> Result<String, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = (MAX_LINE_BYTES + 1) as u64;
    let n = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(ProtocolError::from_read)?;

    if n == 0 {
        return Err(ProtocolError::UnexpectedEof);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() > MAX_LINE_BYTES {
            return Err(ProtocolError::LineTooLong {
                max: MAX_LINE_BYTES,
            });
        }
        return Err(ProtocolError::UnexpectedEof);
    }
    buf.pop();

    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Read a line and parse it as a decimal number.
pub async fn read_number<R, T>(reader: &mut R, field: &'static str) -> Result<T, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: FromStr,
{
    let line = read_line(reader).await?;
    line.parse()
        .map_err(|_| ProtocolError::InvalidNumber { field, value: line })
}

/// Read a length-prefixed blob of at most `max_len` bytes.
pub async fn read_blob<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let len: usize = read_number(reader, "blob length").await?;
    if len > max_len {
        return Err(ProtocolError::BlobTooLarge { len, max: max_len });
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(ProtocolError::from_read)?;
    Ok(buf)
}

/// Write `line` followed by `\n`. The line itself must not contain a newline.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if line.contains('\n') {
        return Err(ProtocolError::EmbeddedNewline(line.to_string()));
    }
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

/// Write `<len>\n<bytes>`.
pub async fn write_blob<W>(writer: &mut W, bytes: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_line(writer, &bytes.len().to_string()).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// A buffered, framed connection
pub struct WireStream<S> {
    inner: BufStream<S>,
    max_blob_bytes: usize,
}

impl<S> WireStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufStream::new(stream),
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
        }
    }

    /// Override the blob size ceiling
    pub fn with_max_blob_bytes(mut self, max_blob_bytes: usize) -> Self {
        self.max_blob_bytes = max_blob_bytes;
        self
    }

    pub fn max_blob_bytes(&self) -> usize {
        self.max_blob_bytes
    }

    pub async fn read_line(&mut self) -> Result<String, ProtocolError> {
        read_line(&mut self.inner).await
    }

    pub async fn read_number<T: FromStr>(
        &mut self,
        field: &'static str,
    ) -> Result<T, ProtocolError> {
        read_number(&mut self.inner, field).await
    }

    pub async fn read_blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        read_blob(&mut self.inner, self.max_blob_bytes).await
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        write_line(&mut self.inner, line).await
    }

    pub async fn write_blob(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        write_blob(&mut self.inner, bytes).await
    }

    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush pending output and close the write half.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Wait for the peer to close its side, discarding anything it still sends.
    pub async fn wait_for_close(&mut self) -> Result<(), ProtocolError> {
        let mut sink = Vec::new();
        self.inner.read_to_end(&mut sink).await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_reads_lines_and_numbers() {
        let mock = Builder::new().read(b"SCANFARM/1\n").read(b"42\n").build();
        let mut wire = WireStream::new(mock);

        assert_eq!(wire.read_line().await.unwrap(), "SCANFARM/1");
        assert_eq!(wire.read_number::<u64>("count").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_blob_keeps_embedded_newlines_and_nuls() {
        let payload = b"line one\nline\0two\n\n";
        let mut encoded = Vec::new();
        write_blob(&mut encoded, payload).await.unwrap();
        assert_eq!(&encoded[..3], b"19\n");

        // Split delivery exercises the read loop across short reads
        let mock = Builder::new()
            .read(&encoded[..5])
            .read(&encoded[5..11])
            .read(&encoded[11..])
            .build();
        let mut wire = WireStream::new(mock);
        assert_eq!(wire.read_blob().await.unwrap(), payload.to_vec());
    }

    #[tokio::test]
    async fn test_eof_mid_blob_is_a_protocol_fault() {
        let mock = Builder::new().read(b"10\nshort").build();
        let mut wire = WireStream::new(mock);
        assert!(matches!(
            wire.read_blob().await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_eof_without_terminator() {
        let mut reader: &[u8] = b"GET_CONFIG";
        assert!(matches!(
            read_line(&mut reader).await,
            Err(ProtocolError::UnexpectedEof)
        ));

        let mut empty: &[u8] = b"";
        assert!(matches!(
            read_line(&mut empty).await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_rejects_oversized_line() {
        let long = vec![b'x'; MAX_LINE_BYTES + 10];
        let mut reader: &[u8] = &long;
        assert!(matches!(
            read_line(&mut reader).await,
            Err(ProtocolError::LineTooLong { .. })
        ));

        let mut exact = vec![b'y'; MAX_LINE_BYTES];
        exact.push(b'\n');
        let mut reader: &[u8] = &exact;
        assert_eq!(read_line(&mut reader).await.unwrap().len(), MAX_LINE_BYTES);
    }

    #[tokio::test]
    async fn test_rejects_blob_over_limit() {
        let mock = Builder::new().read(b"2048\n").build();
        let mut wire = WireStream::new(mock).with_max_blob_bytes(1024);
        assert!(matches!(
            wire.read_blob().await,
            Err(ProtocolError::BlobTooLarge {
                len: 2048,
                max: 1024
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_number() {
        let mut reader: &[u8] = b"12abc\n";
        let err = read_number::<_, usize>(&mut reader, "count")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidNumber { field: "count", .. }
        ));
    }

    #[tokio::test]
    async fn test_write_line_refuses_newline() {
        let mut out = Vec::new();
        assert!(matches!(
            write_line(&mut out, "a\nb").await,
            Err(ProtocolError::EmbeddedNewline(_))
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_writes_are_flushed_as_one_frame() {
        let mock = Builder::new().write(b"GET_SCANPOINTS\n3\n").build();
        let mut wire = WireStream::new(mock);
        wire.write_line("GET_SCANPOINTS").await.unwrap();
        wire.write_line("3").await.unwrap();
        wire.flush().await.unwrap();
    }
}
