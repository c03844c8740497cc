//! PDU framing over async byte streams.
//!
//! Reads use the fixed header to find the frame boundary, so PDUs survive the
//! transport splitting or coalescing writes. Writes go through [`PduWriter`],
//! a cloneable handle that serializes whole PDUs onto one stream.

use std::fmt;
use std::sync::Arc;

use chat_types::{parse_header, Pdu, PduError, HEADER_LEN};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Errors from reading or writing PDUs on a stream.
#[derive(Debug, Error)]
pub enum PduIoError {
    /// The bytes on the stream do not form a valid PDU.
    #[error("frame error: {0}")]
    Frame(#[from] PduError),

    /// The underlying stream failed.
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

impl PduIoError {
    /// Whether the peer closed the stream in the middle of a frame.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Read one PDU.
///
/// Returns `Ok(None)` on a clean end of stream (no header bytes read).
/// A declared length above the receive buffer capacity is rejected before
/// the payload is read.
pub async fn read_pdu<R>(reader: &mut R) -> Result<Option<Pdu>, PduIoError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {filled} header bytes"),
            )
            .into());
        }
        filled += n;
    }

    let (kind, len) = parse_header(&header)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Pdu::new(kind, payload)))
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared write half of a stream.
///
/// Clones refer to the same stream. Each [`send`](Self::send) writes a whole
/// PDU under the lock, so concurrent senders never interleave bytes.
#[derive(Clone)]
pub struct PduWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl PduWriter {
    /// Wrap a stream's write half.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Encode and write one PDU, then flush.
    pub async fn send(&self, pdu: &Pdu) -> Result<(), PduIoError> {
        let bytes = pdu.to_bytes()?;
        let mut writer = self.inner.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the write direction of the stream.
    pub async fn shutdown(&self) -> Result<(), PduIoError> {
        let mut writer = self.inner.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    /// Whether both handles write to the same stream.
    pub fn same_stream(&self, other: &PduWriter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PduWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PduWriter")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
