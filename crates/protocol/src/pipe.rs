//! Length-prefixed JSON framing over the worker's stdio pipes.
//!
//! Each frame is a 4-byte little-endian length followed by that many bytes of
//! UTF-8 JSON. The supervisor relays client text into frames verbatim and
//! forwards worker frames back out verbatim, so this layer never inspects
//! message contents.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Hard cap on a single frame. A frame carries at most one compressed image,
/// so anything larger indicates a corrupt length prefix.
pub const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

/// Writes one framed message and flushes the pipe.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = payload.as_bytes();
    let len = u32::try_from(bytes.len()).map_err(|_| Error::FrameTooLarge {
        len: u32::MAX,
        max: MAX_FRAME_LEN,
    })?;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message.
///
/// Returns `Ok(None)` on a clean end of stream (the peer closed between
/// frames). An end of stream inside a frame is [`Error::Truncated`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Truncated);
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::Truncated,
            _ => Error::Io(e),
        })?;

    Ok(Some(String::from_utf8(payload)?))
}
