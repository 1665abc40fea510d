//! Wire framing.
//!
//! ```text
//! u32 num_payloads
//! for each payload:
//!     u32 size
//!     size bytes
//!     0-3 zero bytes padding to 4-byte alignment
//! ```
//!
//! All integers are little-endian. After a complete message the receiver
//! replies with the 4-byte ACK `0x11 0x22 0x33 0x44`. A message with zero
//! payloads is a keepalive: it is ACKed but not dispatched.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on payloads per message.
pub const MAX_PAYLOADS_IN_MESSAGE: u32 = 32;

/// Hard cap on a single payload's size.
pub const MAX_PAYLOAD_SIZE_BYTES: u32 = 1024 * 1024;

/// Receiver's acknowledgement of a complete message.
pub const ACK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o deadline exceeded")]
    Timeout,
    #[error("message carries too many payloads: {0}")]
    TooManyPayloads(u32),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u32),
    #[error("peer replied with a malformed ack")]
    BadAck,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn padding_len(size: u32) -> usize {
    ((4 - size % 4) % 4) as usize
}

/// Serialize a payload vector into one wire frame.
pub fn encode_frame(payloads: &[Vec<u8>]) -> Result<Vec<u8>, FrameError> {
    if payloads.len() as u32 > MAX_PAYLOADS_IN_MESSAGE {
        return Err(FrameError::TooManyPayloads(payloads.len() as u32));
    }
    let mut frame = Vec::with_capacity(4 + payloads.iter().map(|p| p.len() + 8).sum::<usize>());
    frame.extend_from_slice(&(payloads.len() as u32).to_le_bytes());
    for payload in payloads {
        let size = payload.len() as u32;
        if size > MAX_PAYLOAD_SIZE_BYTES {
            return Err(FrameError::PayloadTooLarge(size));
        }
        frame.extend_from_slice(&size.to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend(std::iter::repeat(0u8).take(padding_len(size)));
    }
    Ok(frame)
}

async fn read_exact_deadline<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    deadline: Duration,
) -> Result<(), FrameError> {
    match tokio::time::timeout(deadline, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(FrameError::Io(e)),
        Err(_) => Err(FrameError::Timeout),
    }
}

async fn read_u32<R: AsyncRead + Unpin>(
    reader: &mut R,
    deadline: Duration,
) -> Result<u32, FrameError> {
    let mut buf = [0u8; 4];
    read_exact_deadline(reader, &mut buf, deadline).await?;
    Ok(u32::from_le_bytes(buf))
}

/// Read one complete frame, enforcing the per-I/O deadline on every read.
/// Returns an empty vector for keepalives.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    deadline: Duration,
) -> Result<Vec<Vec<u8>>, FrameError> {
    let num_payloads = read_u32(reader, deadline).await?;
    if num_payloads > MAX_PAYLOADS_IN_MESSAGE {
        return Err(FrameError::TooManyPayloads(num_payloads));
    }
    let mut payloads = Vec::with_capacity(num_payloads as usize);
    for _ in 0..num_payloads {
        let size = read_u32(reader, deadline).await?;
        if size > MAX_PAYLOAD_SIZE_BYTES {
            return Err(FrameError::PayloadTooLarge(size));
        }
        let mut payload = vec![0u8; size as usize];
        read_exact_deadline(reader, &mut payload, deadline).await?;
        let mut padding = [0u8; 3];
        read_exact_deadline(reader, &mut padding[..padding_len(size)], deadline).await?;
        payloads.push(payload);
    }
    Ok(payloads)
}

/// Write a serialized frame under the deadline.
pub async fn write_all_deadline<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
    deadline: Duration,
) -> Result<(), FrameError> {
    match tokio::time::timeout(deadline, writer.write_all(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FrameError::Io(e)),
        Err(_) => Err(FrameError::Timeout),
    }
}

/// Read and check the peer's ACK.
pub async fn read_ack<R: AsyncRead + Unpin>(
    reader: &mut R,
    deadline: Duration,
) -> Result<(), FrameError> {
    let mut buf = [0u8; 4];
    read_exact_deadline(reader, &mut buf, deadline).await?;
    if buf != ACK {
        return Err(FrameError::BadAck);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DEADLINE: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn frame_round_trip_with_padding() {
        // Payload sizes 1, 4, 5 exercise all padding branches.
        let payloads = vec![vec![0xAA], vec![1, 2, 3, 4], vec![5, 6, 7, 8, 9]];
        let frame = encode_frame(&payloads).unwrap();
        assert_eq!(frame.len() % 4, 0);

        let mut cursor = Cursor::new(frame);
        let decoded = read_frame(&mut cursor, DEADLINE).await.unwrap();
        assert_eq!(decoded, payloads);
    }

    #[tokio::test]
    async fn keepalive_is_an_empty_frame() {
        let frame = encode_frame(&[]).unwrap();
        assert_eq!(frame, 0u32.to_le_bytes());

        let mut cursor = Cursor::new(frame);
        let decoded = read_frame(&mut cursor, DEADLINE).await.unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_count_is_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(MAX_PAYLOADS_IN_MESSAGE + 1).to_le_bytes());
        let mut cursor = Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor, DEADLINE).await,
            Err(FrameError::TooManyPayloads(_))
        ));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&(MAX_PAYLOAD_SIZE_BYTES + 1).to_le_bytes());
        let mut cursor = Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor, DEADLINE).await,
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn truncated_frame_times_out() {
        let payloads = vec![vec![1, 2, 3]];
        let mut frame = encode_frame(&payloads).unwrap();
        frame.truncate(frame.len() - 2);

        // A Cursor yields EOF rather than blocking, which surfaces as Io.
        let mut cursor = Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor, DEADLINE).await,
            Err(FrameError::Io(_))
        ));
    }
}
