//! Envelope framing over byte streams (the TCP transfer plane).
//!
//! A frame is the fixed header block followed by exactly `Content-Length`
//! body bytes, so the reader needs no delimiter scanning.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use rdv_core::wire::{self, Envelope, ProtocolError, HEADER_SIZE};

/// Largest body accepted from a stream peer.
pub const MAX_FRAME_BODY: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Read the next frame. `Ok(None)` means the peer closed the stream
/// cleanly between frames.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Option<Envelope>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: filled,
            }
            .into());
        }
        filled += n;
    }

    let start_line = wire::decode_start_line(&header)?;
    let headers = wire::decode_headers(&header)?;
    if headers.content_length > MAX_FRAME_BODY {
        return Err(ProtocolError::BodyTooLarge(headers.content_length).into());
    }

    let mut body = vec![0u8; headers.content_length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Protocol(ProtocolError::Truncated {
                expected: headers.content_length,
                actual: 0,
            })
        } else {
            FrameError::Io(e)
        }
    })?;
    let body = wire::decode_body(&body, headers.content_length)?;

    Ok(Some(Envelope {
        start_line,
        headers,
        body,
    }))
}

/// Encode and write one frame.
pub async fn write_envelope<W, T>(writer: &mut W, start_line: &str, body: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let bytes = wire::encode(start_line, body)?;
    writer.write_all(&bytes).await?;
    Ok(())
}
