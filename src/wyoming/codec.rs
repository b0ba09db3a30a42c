//! Wyoming wire framing
//!
//! Each event on the wire is a newline-terminated JSON header:
//!
//! ```text
//! {"type": "...", "data": {...}, "data_length": N, "payload_length": M}\n
//! ```
//!
//! If `data_length` is present the data block follows the header as N raw
//! JSON bytes (taking precedence over any inline `data`); if
//! `payload_length` is present, M payload bytes follow that. Writing always
//! embeds data inline and appends only the payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::event::Event;

/// Upper bound for a single data or payload block. Frames beyond this are
/// a protocol violation and drop the connection.
pub const MAX_BLOCK_LEN: usize = 10 * 1024 * 1024;

/// Failures while reading or writing framed events
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame block of {0} bytes exceeds the {MAX_BLOCK_LEN} byte limit")]
    BlockTooLarge(usize),
}

/// Event header as it appears on the wire
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

/// Read the next event from the stream.
///
/// Returns `Ok(None)` on a clean EOF before any header bytes, which is how
/// a client hangs up between events.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    // The header read is capped like the blocks: a peer that never sends a
    // newline must not make us buffer without bound.
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_BLOCK_LEN as u64 + 1);
    if limited.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') && line.len() > MAX_BLOCK_LEN {
        return Err(ProtocolError::BlockTooLarge(line.len()));
    }

    let header: Header = serde_json::from_slice(&line)?;

    let mut data = header.data;
    if let Some(len) = header.data_length.filter(|len| *len > 0) {
        data = Some(serde_json::from_slice(&read_block(reader, len).await?)?);
    }

    let mut payload = Vec::new();
    if let Some(len) = header.payload_length.filter(|len| *len > 0) {
        payload = read_block(reader, len).await?;
    }

    Ok(Some(Event::from_wire(&header.event_type, data, payload)?))
}

/// Write one event: header line first, then the payload if there is one
pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let (event_type, data, payload) = event.to_wire()?;

    let header = Header {
        event_type,
        data,
        data_length: None,
        payload_length: payload.map(<[u8]>::len).filter(|len| *len > 0),
    };

    let mut frame = serde_json::to_vec(&header)?;
    frame.push(b'\n');
    if let Some(payload) = payload {
        frame.extend_from_slice(payload);
    }

    writer.write_all(&frame).await?;
    writer.flush().await?;

    Ok(())
}

/// Read an exact-length block, enforcing the frame size cap
async fn read_block<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    if len > MAX_BLOCK_LEN {
        return Err(ProtocolError::BlockTooLarge(len));
    }
    let mut block = vec![0u8; len];
    reader.read_exact(&mut block).await?;
    Ok(block)
}
