//! Load-balanced client.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tinyrpc_client::Client;
use tinyrpc_common::protocol::error::{Result, RpcError};
use tinyrpc_common::protocol::Options;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::discovery::{Discovery, SelectMode};

/// Client that spreads calls over the servers of a [`Discovery`].
///
/// One [`Client`] is kept per server address and reused while it stays
/// available; a client that has shut down is replaced on next use.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tinyrpc_common::Options;
/// use tinyrpc_xclient::{MultiServersDiscovery, SelectMode, XClient};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let discovery = Arc::new(MultiServersDiscovery::new(vec![
///     "tcp@127.0.0.1:9001".to_string(),
///     "tcp@127.0.0.1:9002".to_string(),
/// ]));
/// let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());
///
/// let sum: i64 = xclient.call("Foo.Sum", &(3, 4)).await?;
/// let sum: i64 = xclient.broadcast("Foo.Sum", &(3, 4)).await?;
/// xclient.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct XClient {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    options: Options,
    clients: Mutex<HashMap<String, Client>>,
}

impl XClient {
    pub fn new(discovery: Arc<dyn Discovery>, mode: SelectMode, options: Options) -> Self {
        Self {
            discovery,
            mode,
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached client for `rpc_addr`, dialing a new one if there
    /// is none or the cached one is no longer available.
    ///
    /// The pool is not locked while dialing. If another task cached a
    /// usable client for the same address in the meantime, that one wins
    /// and the fresh connection is closed.
    async fn dial(&self, rpc_addr: &str) -> Result<Client> {
        let stale = {
            let mut clients = self.clients.lock().await;
            if let Some(client) = clients.get(rpc_addr).filter(|c| c.is_available()) {
                return Ok(client.clone());
            }
            clients.remove(rpc_addr)
        };
        if let Some(stale) = stale {
            debug!("Dropping unavailable client for {}", rpc_addr);
            let _ = stale.close().await;
        }

        let client = Client::xdial(rpc_addr, self.options).await?;

        let mut clients = self.clients.lock().await;
        if let Some(cached) = clients.get(rpc_addr).filter(|c| c.is_available()) {
            let cached = cached.clone();
            drop(clients);
            let _ = client.close().await;
            return Ok(cached);
        }
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    async fn call_on<A, R>(&self, rpc_addr: &str, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let client = self.dial(rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Calls one server chosen by the select mode.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let rpc_addr = self.discovery.get(self.mode)?;
        self.call_on(&rpc_addr, service_method, args).await
    }

    /// Calls every known server concurrently.
    ///
    /// Returns the first error as soon as it arrives, abandoning the calls
    /// still in flight. If every call succeeds, returns one of the replies.
    ///
    /// # Errors
    ///
    /// [`RpcError::NoAvailableServers`] if discovery knows no server.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let reply = self
            .for_each_server(move |rpc_addr| async move {
                self.call_on::<A, R>(&rpc_addr, service_method, args).await
            })
            .await?;
        reply.ok_or(RpcError::NoAvailableServers)
    }

    /// Like [`broadcast`](Self::broadcast), but ignores the replies.
    pub async fn broadcast_discard<A>(&self, service_method: &str, args: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        self.for_each_server(move |rpc_addr| async move {
            let client = self.dial(&rpc_addr).await?;
            client.go::<A, ()>(service_method, args).await.discard().await
        })
        .await?;
        Ok(())
    }

    async fn for_each_server<T, F, Fut>(&self, f: F) -> Result<Option<T>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let servers = self.discovery.get_all()?;
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }

        let mut calls: FuturesUnordered<_> = servers.into_iter().map(&f).collect();
        let mut reply = None;
        while let Some(result) = calls.next().await {
            match result {
                Ok(value) => {
                    if reply.is_none() {
                        reply = Some(value);
                    }
                }
                Err(e) => {
                    warn!("Broadcast failed: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(reply)
    }

    /// Closes every cached client.
    pub async fn close(&self) -> Result<()> {
        let mut clients = self.clients.lock().await;
        for (rpc_addr, client) in clients.drain() {
            if let Err(e) = client.close().await {
                debug!("Closing {}: {}", rpc_addr, e);
            }
        }
        Ok(())
    }
}
