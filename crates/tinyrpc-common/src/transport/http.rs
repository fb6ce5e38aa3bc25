//! HTTP CONNECT tunnel constants and the client side of the tunnel request.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::error::{Result, RpcError};

/// Path that accepts `CONNECT` and hands the connection to the RPC server.
pub const DEFAULT_RPC_PATH: &str = "/_tinyrpc_";

/// Path serving the plain-text service listing.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/tinyrpc";

/// Status line tail sent back on a successful tunnel request.
pub const CONNECTED: &str = "200 Connected to Tiny RPC";

/// Reason phrase of the successful tunnel response.
pub const CONNECTED_REASON: &str = "Connected to Tiny RPC";

const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Builds the tunnel request for `path`.
pub fn connect_request(path: &str) -> String {
    format!("CONNECT {} HTTP/1.0\r\n\r\n", path)
}

/// Reads the response head of a tunnel request.
///
/// Reads byte by byte so nothing past the blank line is consumed: the bytes
/// after it belong to the RPC stream. Succeeds only on status 200.
pub async fn read_connect_response<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(RpcError::Http(
                "connection closed before response".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(RpcError::Http("response head too large".to_string()));
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let status = parts.next().unwrap_or_default();
    if status != "200" {
        return Err(RpcError::Http(format!(
            "unexpected HTTP response: {}",
            status_line.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_connect_request() {
        assert_eq!(
            connect_request(DEFAULT_RPC_PATH),
            "CONNECT /_tinyrpc_ HTTP/1.0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_response_leaves_trailing_bytes() {
        let (mut server, mut client) = tokio::io::duplex(1024);
        server
            .write_all(b"HTTP/1.0 200 Connected to Tiny RPC\r\n\r\nrest")
            .await
            .unwrap();

        read_connect_response(&mut client).await.unwrap();

        let mut rest = [0u8; 4];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"rest");
    }

    #[tokio::test]
    async fn test_response_with_headers() {
        let (mut server, mut client) = tokio::io::duplex(1024);
        server
            .write_all(b"HTTP/1.1 200 Connected to Tiny RPC\r\ndate: today\r\n\r\n")
            .await
            .unwrap();
        read_connect_response(&mut client).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_200_is_rejected() {
        let (mut server, mut client) = tokio::io::duplex(1024);
        server
            .write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n")
            .await
            .unwrap();

        let err = read_connect_response(&mut client).await.unwrap_err();
        assert!(err.to_string().contains("405"));
    }

    #[tokio::test]
    async fn test_closed_mid_response() {
        let (mut server, mut client) = tokio::io::duplex(1024);
        server.write_all(b"HTTP/1.0 200").await.unwrap();
        drop(server);

        assert!(matches!(
            read_connect_response(&mut client).await,
            Err(RpcError::Http(_))
        ));
    }
}
