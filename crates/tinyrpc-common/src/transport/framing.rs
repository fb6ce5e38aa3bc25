//! Length-prefixed framing.
//!
//! Wire format of every frame: `[4-byte length as u32 big-endian] + [payload]`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};

/// Maximum frame payload (100 MB), guards against hostile length prefixes.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Writes one frame. The caller decides when to flush.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }
    let len = data.len() as u32;

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))?;

    Ok(())
}

/// Reads one frame.
///
/// # Errors
///
/// Returns an error if:
/// - Reading the length prefix fails (including a clean EOF)
/// - Message exceeds [`MAX_MESSAGE_SIZE`]
/// - Reading the data fails
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = read_len(reader).await?;

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;

    Ok(buf)
}

/// Consumes one frame without buffering its payload.
pub async fn skip_frame<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let len = read_len(reader).await? as u64;

    let copied = tokio::io::copy(&mut (&mut *reader).take(len), &mut tokio::io::sink())
        .await
        .map_err(|e| map_io_error(e, "skipping data"))?;
    if copied != len {
        return Err(RpcError::Connection(
            "skipping data: connection closed".to_string(),
        ));
    }

    Ok(())
}

async fn read_len<R>(reader: &mut R) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| map_io_error(e, "reading length prefix"))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }
    Ok(len)
}

/// Maps IO errors to [`RpcError::Connection`] with the failing step as context.
fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            RpcError::Connection(format!("{}: connection closed", context))
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected => {
            RpcError::Connection(format!("{}: connection lost", context))
        }
        _ => RpcError::Connection(format!("{}: {}", context, err)),
    }
}
