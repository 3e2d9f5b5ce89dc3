//! Length-prefixed JSON frame codec (spec.md §4.1).
//!
//! Two wire modes share one connection: framed-JSON for every request and
//! most responses, and header+raw-tail for `read` responses, whose payload
//! bytes ride immediately after the JSON header, outside the length prefix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TorrentFsError};

/// Maximum JSON frame size (spec.md §4.1).
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Read one length-prefixed JSON frame and deserialize it.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let bytes = read_frame_bytes(reader).await?;
    serde_json::from_slice(&bytes).map_err(TorrentFsError::from)
}

/// Read one length-prefixed frame's raw bytes, enforcing the max frame size.
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(TorrentFsError::BadRequest(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a value as one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)?;
    write_frame_bytes(writer, &bytes).await
}

pub async fn write_frame_bytes<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len()).map_err(|_| TorrentFsError::BadRequest("frame too large to encode".into()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Write a JSON header frame immediately followed by `data_len` raw bytes,
/// outside the length prefix (the `read` response's wire shape).
pub async fn write_header_and_tail<W, T>(writer: &mut W, header: &T, tail: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    write_frame(writer, header).await?;
    writer.write_all(tail).await?;
    Ok(())
}
