//! Client Call Engine.
//!
//! # Locking
//!
//! Two locks guard a connection:
//!
//! - the send lock (`writer`), held for the whole of one request write so
//!   header and body bytes of concurrent callers never interleave
//! - the state lock (`state`), guarding the sequence counter, the pending
//!   table and the closing/shutdown flags
//!
//! Issuing takes the send lock, then the state lock. Teardown takes them in
//! the same order, so a call can never be swept while it is being
//! registered.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tinyrpc_common::protocol::error::{Result, RpcError};
use tinyrpc_common::protocol::{Header, Options, Seq};
use tinyrpc_common::transport::{send_options, BoxedStream, CodecReader, CodecWriter, RpcStream};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::call::{Call, ReplySender};

type Reader = CodecReader<ReadHalf<BoxedStream>>;
type Writer = CodecWriter<WriteHalf<BoxedStream>>;

struct State {
    seq: Seq,
    pending: HashMap<Seq, ReplySender>,
    /// set by [`Client::close`]
    closing: bool,
    /// set by teardown after a receive failure
    shutdown: bool,
}

struct ClientInner {
    options: Options,
    writer: tokio::sync::Mutex<Writer>,
    state: Mutex<State>,
    close_tx: watch::Sender<bool>,
}

impl ClientInner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the next sequence number and records the call as pending.
    ///
    /// A closing or shut down client completes `tx` with
    /// [`RpcError::ShutDown`] right away.
    fn register_call(&self, tx: ReplySender) -> Result<Seq> {
        let mut state = self.lock_state();
        if state.closing || state.shutdown {
            let _ = tx.send(Err(RpcError::ShutDown));
            return Err(RpcError::ShutDown);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(seq, tx);
        Ok(seq)
    }

    fn remove_call(&self, seq: Seq) -> Option<ReplySender> {
        self.lock_state().pending.remove(&seq)
    }

    /// Registers and writes one request under the send lock.
    ///
    /// Returns the assigned sequence number, `0` if the call was rejected.
    /// A failed write may leave part of a frame on the wire, so the client
    /// is shut down and the receive loop told to stop.
    async fn send_request(&self, service_method: String, body: Vec<u8>, tx: ReplySender) -> Seq {
        let mut writer = self.writer.lock().await;
        let Ok(seq) = self.register_call(tx) else {
            return 0;
        };

        let header = Header::request(service_method, seq);
        if let Err(err) = writer.write_raw(&header, &body).await {
            warn!("Failed to send {} (seq {}): {}", header.service_method, seq, err);
            self.lock_state().shutdown = true;
            if let Some(tx) = self.remove_call(seq) {
                let _ = tx.send(Err(err));
            }
            let _ = self.close_tx.send(true);
        }
        seq
    }

    /// Marks the client shut down and completes every pending call with `err`,
    /// or with [`RpcError::ShutDown`] if the user closed the client.
    async fn terminate_calls(&self, err: RpcError) {
        let _writer = self.writer.lock().await;
        let mut state = self.lock_state();
        state.shutdown = true;
        let err = if state.closing { RpcError::ShutDown } else { err };
        let pending = std::mem::take(&mut state.pending);
        drop(state);

        if !pending.is_empty() {
            debug!("Terminating {} pending calls: {}", pending.len(), err);
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

/// RPC client bound to a single connection.
///
/// Cheap to clone; clones share the connection. Any number of tasks may
/// issue calls concurrently.
///
/// # Example
///
/// ```no_run
/// use tinyrpc_client::Client;
/// use tinyrpc_common::Options;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Args {
///     num1: i64,
///     num2: i64,
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
///
/// let sum: i64 = client.call("Foo.Sum", &Args { num1: 3, num2: 4 }).await?;
/// assert_eq!(sum, 7);
///
/// // issue now, collect later
/// let pending = client.go::<_, i64>("Foo.Sum", &Args { num1: 1, num2: 2 }).await;
/// let sum = pending.await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Runs the handshake on an established stream and starts the receive loop.
    ///
    /// # Arguments
    ///
    /// * `stream` - A connected stream, e.g. a `TcpStream`
    /// * `options` - Options announced to the server; the codec is used for
    ///   every later message
    pub async fn new<S>(stream: S, options: Options) -> Result<Self>
    where
        S: RpcStream,
    {
        let mut stream: BoxedStream = Box::new(stream);
        send_options(&mut stream, &options).await?;

        let (reader, writer) = options.codec_type.new_codec(stream);
        let (close_tx, close_rx) = watch::channel(false);
        let inner = Arc::new(ClientInner {
            options,
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(State {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            close_tx,
        });

        tokio::spawn(receive(Arc::downgrade(&inner), reader, close_rx));

        Ok(Self { inner })
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Issues a call and returns its handle without waiting for the reply.
    ///
    /// The request is fully written (or has failed) when this returns. If the
    /// client is closing or shut down, or the write fails, the returned
    /// `Call` is already completed with the error.
    ///
    /// The write runs on its own task. Dropping the returned future before
    /// it resolves abandons the call, but the request still goes out whole,
    /// so the connection stays in sync for other callers.
    pub async fn go<A, R>(&self, service_method: impl Into<String>, args: &A) -> Call<R>
    where
        A: Serialize + ?Sized,
    {
        let service_method = service_method.into();
        let codec_type = self.inner.options.codec_type;
        let (tx, rx) = oneshot::channel();

        let body = match codec_type.encode(args) {
            Ok(body) => body,
            Err(err) => {
                let _ = tx.send(Err(err));
                return Call::new(0, service_method, codec_type, rx);
            }
        };

        let inner = Arc::clone(&self.inner);
        let name = service_method.clone();
        let send = tokio::spawn(async move { inner.send_request(name, body, tx).await });

        let seq = match send.await {
            Ok(seq) => seq,
            Err(e) => {
                warn!("Send task for {} failed: {}", service_method, e);
                0
            }
        };
        Call::new(seq, service_method, codec_type, rx)
    }

    /// Issues a call and waits for its reply.
    pub async fn call<A, R>(&self, service_method: impl Into<String>, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.go(service_method, args).await.await
    }

    /// Like [`call`](Self::call), but gives up after `timeout`.
    ///
    /// On expiry the call is removed from the pending table, so a late
    /// response is drained and ignored. A zero timeout waits forever.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: impl Into<String>,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let call: Call<R> = self.go(service_method, args).await;
        if timeout.is_zero() {
            return call.await;
        }

        let seq = call.seq();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.remove_call(seq);
                Err(RpcError::Timeout(format!(
                    "rpc client: call failed: deadline exceeded after {:?}",
                    timeout
                )))
            }
        }
    }

    /// Closes the connection.
    ///
    /// Calls still pending complete with [`RpcError::ShutDown`]. A second
    /// `close` returns [`RpcError::ShutDown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.lock_state();
            if state.closing {
                return Err(RpcError::ShutDown);
            }
            state.closing = true;
        }

        let _ = self.inner.close_tx.send(true);
        let mut writer = self.inner.writer.lock().await;
        writer.close().await
    }

    /// Whether new calls can still be issued.
    pub fn is_available(&self) -> bool {
        let state = self.inner.lock_state();
        !state.closing && !state.shutdown
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.inner.lock_state().pending.len()
    }
}

/// Receive loop: routes every response to its pending call.
///
/// Holds only a weak reference; when the last [`Client`] is dropped the
/// close channel's sender goes away and the loop exits.
async fn receive(inner: Weak<ClientInner>, mut reader: Reader, mut close_rx: watch::Receiver<bool>) {
    let err = loop {
        let header = tokio::select! {
            result = reader.read_header() => match result {
                Ok(header) => header,
                Err(err) => break err,
            },
            _ = close_rx.changed() => break RpcError::ShutDown,
        };

        let Some(client) = inner.upgrade() else {
            return;
        };

        let result = match client.remove_call(header.seq) {
            // abandoned, timed out or never fully sent
            None => reader.discard_body().await,
            Some(tx) if !header.is_ok() => {
                let result = reader.discard_body().await;
                let _ = tx.send(Err(RpcError::Server(header.error)));
                result
            }
            Some(tx) => match reader.read_raw_body().await {
                Ok(body) => {
                    let _ = tx.send(Ok(body));
                    Ok(())
                }
                Err(err) => {
                    let _ = tx.send(Err(err.clone()));
                    Err(err)
                }
            },
        };

        if let Err(err) = result {
            break err;
        }
    };

    debug!("Receive loop stopped: {}", err);
    if let Some(client) = inner.upgrade() {
        client.terminate_calls(err).await;
    }
}
