//! Async frame I/O over `tokio::io` streams.
//!
//! Both functions loop until the full frame has been transferred: a single
//! `read` may return fewer bytes than requested (large payloads are split
//! across TCP segments), and a single `write` may accept only part of the
//! buffer.

use std::str::Utf8Error;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    FrameHeader,
    errors::Result,
    frame::{Frame, decode_text},
};

/// Result of reading one frame from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete frame with valid UTF-8 text (trailing whitespace stripped).
    ///
    /// May be empty; an empty message is not a disconnect.
    Message(String),

    /// A complete frame whose payload is not valid UTF-8.
    ///
    /// The stream is still in sync; the caller decides how to treat the
    /// content.
    Malformed {
        /// Raw payload bytes
        payload: Bytes,
        /// Decode failure
        error: Utf8Error,
    },

    /// The peer closed the connection before sending any byte of a new frame.
    PeerClosed,
}

/// Read exactly one frame.
///
/// Zero bytes on the first read of the length prefix means the peer closed
/// the connection cleanly and yields [`ReadOutcome::PeerClosed`]. EOF anywhere
/// later inside the frame is an error.
///
/// # Errors
///
/// - `ProtocolError::PayloadTooLarge` if the prefix exceeds `max_payload`
/// - `ProtocolError::Io` if the stream fails or ends mid-frame
pub async fn read_frame<R>(reader: &mut R, max_payload: u64) -> Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FrameHeader::SIZE];

    let first = reader.read(&mut prefix).await?;
    if first == 0 {
        return Ok(ReadOutcome::PeerClosed);
    }
    if first < FrameHeader::SIZE {
        reader.read_exact(&mut prefix[first..]).await?;
    }

    let header = FrameHeader::from_prefix(prefix);
    let payload_len = header.checked_payload_len(max_payload)?;

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    Ok(match decode_text(&payload) {
        Ok(text) => ReadOutcome::Message(text),
        Err(error) => ReadOutcome::Malformed { payload: Bytes::from(payload), error },
    })
}

/// Write one frame carrying `text`.
///
/// Writes the 8-byte prefix followed by the UTF-8 payload and flushes.
///
/// # Errors
///
/// - `ProtocolError::Io` if the stream fails before the whole frame is written
pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = Frame::text(text);
    let mut buf = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut buf);

    writer.write_all(&buf).await?;
    writer.flush().await?;

    Ok(())
}
