//! Deadline-bounded message I/O on a raw stream.
//!
//! A message is exactly one read or one write; no framing is added. Data
//! buffers streamed after a `split` exchange use the same helpers.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::BUFFER_SIZE;
use crate::error::WireError;

/// Reads one message of at most [`BUFFER_SIZE`] bytes.
///
/// Returns `None` when the peer closed the stream.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, WireError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let n = read_into(reader, &mut buf, timeout).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}

/// Performs a single read into `buf`, returning the byte count (0 = EOF).
pub async fn read_into<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, WireError> {
    match tokio::time::timeout(timeout, reader.read(buf)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WireError::Timeout),
    }
}

/// Writes one message and flushes it.
///
/// Payloads larger than [`BUFFER_SIZE`] are refused: the peer would split
/// them across reads.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), WireError> {
    if payload.len() > BUFFER_SIZE {
        return Err(WireError::TooLarge(payload.len()));
    }
    let write = async {
        writer.write_all(payload).await?;
        writer.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WireError::Timeout),
    }
}
