//! Connection establishment: plain TCP, HTTP CONNECT tunnel, and
//! `protocol@addr` dispatch.

use std::future::Future;
use std::time::Duration;
use tinyrpc_common::protocol::error::{Result, RpcError};
use tinyrpc_common::protocol::Options;
use tinyrpc_common::transport::http::{connect_request, read_connect_response, DEFAULT_RPC_PATH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::client::Client;

impl Client {
    /// Connects over TCP and performs the handshake.
    ///
    /// Connect and handshake together must finish within
    /// `options.connect_timeout` (zero means no limit).
    pub async fn dial(addr: &str, options: Options) -> Result<Client> {
        with_connect_timeout(options.connect_timeout, async {
            let stream = TcpStream::connect(addr).await?;
            Client::new(stream, options).await
        })
        .await
    }

    /// Connects through the HTTP CONNECT tunnel served on
    /// [`DEFAULT_RPC_PATH`].
    pub async fn dial_http(addr: &str, options: Options) -> Result<Client> {
        with_connect_timeout(options.connect_timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            stream
                .write_all(connect_request(DEFAULT_RPC_PATH).as_bytes())
                .await?;
            read_connect_response(&mut stream).await?;
            Client::new(stream, options).await
        })
        .await
    }

    /// Connects to an address of the form `protocol@addr`.
    ///
    /// # Arguments
    ///
    /// * `rpc_addr` - `tcp@host:port` or `http@host:port`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tinyrpc_client::Client;
    /// use tinyrpc_common::Options;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let over_tcp = Client::xdial("tcp@127.0.0.1:9999", Options::default()).await?;
    /// let over_http = Client::xdial("http@127.0.0.1:9998", Options::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn xdial(rpc_addr: &str, options: Options) -> Result<Client> {
        let (protocol, addr) = rpc_addr
            .split_once('@')
            .ok_or_else(|| RpcError::InvalidAddress(rpc_addr.to_string()))?;

        match protocol {
            "tcp" => Client::dial(addr, options).await,
            "http" => Client::dial_http(addr, options).await,
            _ => Err(RpcError::InvalidAddress(rpc_addr.to_string())),
        }
    }
}

async fn with_connect_timeout<F>(timeout: Duration, fut: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(format!(
            "rpc client: connect timeout: expect within {:?}",
            timeout
        ))),
    }
}
