//! Connection handshake.
//!
//! The dialing side writes its [`Options`] as a single length-prefixed JSON
//! frame before any codec traffic. The accepting side reads exactly that
//! frame, validates it and either switches to the negotiated codec or drops
//! the connection without writing anything back.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Options, WireOptions};
use crate::transport::framing::{read_frame, write_frame};

/// Sends the options frame and flushes it.
pub async fn send_options<W>(writer: &mut W, options: &Options) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = serde_json::to_vec(&options.to_wire())?;
    write_frame(writer, &data).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads and validates the options frame.
///
/// # Errors
///
/// - [`RpcError::Handshake`] if the frame is not a valid options document
///   or the magic number does not match
/// - [`RpcError::InvalidCodec`] if the codec tag is unknown
/// - [`RpcError::Connection`] if the stream ends before a full frame
pub async fn read_options<R>(reader: &mut R) -> Result<Options>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    let wire: WireOptions = serde_json::from_slice(&frame)
        .map_err(|e| RpcError::Handshake(format!("options error: {}", e)))?;
    let options = wire.validate()?;
    debug!(codec = %options.codec_type, "handshake accepted");
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CodecType;
    use std::time::Duration;

    #[tokio::test]
    async fn test_options_exchange() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = Options::default()
            .with_codec(CodecType::Postcard)
            .with_handle_timeout(Duration::from_secs(1));

        send_options(&mut client, &sent).await.unwrap();
        let received = read_options(&mut server).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_garbage_is_handshake_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"not json").await.unwrap();

        let result = read_options(&mut server).await;
        assert!(matches!(result, Err(RpcError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_wrong_magic_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut options = Options::default();
        options.magic_number = 0xdead;
        send_options(&mut client, &options).await.unwrap();

        let result = read_options(&mut server).await;
        assert!(matches!(result, Err(RpcError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_unknown_codec_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let doc = br#"{"magic_number":3927900,"codec_type":"application/gob"}"#;
        write_frame(&mut client, doc).await.unwrap();

        let result = read_options(&mut server).await;
        assert_eq!(
            result,
            Err(RpcError::InvalidCodec("application/gob".to_string()))
        );
    }

    #[tokio::test]
    async fn test_closed_before_options() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        let result = read_options(&mut server).await;
        assert!(matches!(result, Err(RpcError::Connection(_))));
    }
}
