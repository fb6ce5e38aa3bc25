//! Server Dispatch Engine.
//!
//! # Connection lifecycle
//!
//! 1. Read and validate the options frame; on failure drop the connection
//!    without writing anything.
//! 2. Loop: read a header and its body frame. Resolve `Service.Method` and
//!    decode the argument; request-level failures are answered with an
//!    error header and the loop continues.
//! 3. Each resolved request runs in its own handling unit, so requests on
//!    one connection are pipelined.
//! 4. On read failure stop reading, wait for in-flight handling units, then
//!    close the connection.
//!
//! All responses of a connection go through one writer behind an async
//! mutex, so header and body of different responses never interleave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tinyrpc_common::protocol::error::{Result, RpcError};
use tinyrpc_common::protocol::Header;
use tinyrpc_common::transport::{read_options, CodecType, CodecWriter, RpcStream};
use tokio::io::WriteHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::service::{validate_name, Invocation, MethodType, Service};

type SharedWriter<S> = Arc<Mutex<CodecWriter<WriteHalf<S>>>>;

/// RPC server holding the service table.
///
/// Cheap to clone; clones share the service table. Services may be
/// registered while connections are being served.
///
/// # Example
///
/// ```no_run
/// use serde::Deserialize;
/// use tinyrpc_server::{Server, Service};
/// use tokio::net::TcpListener;
///
/// struct Foo;
///
/// #[derive(Deserialize)]
/// struct Args {
///     num1: i64,
///     num2: i64,
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new();
/// server.register(
///     Service::builder(Foo)
///         .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
///             *reply = args.num1 + args.num2;
///             Ok(())
///         })?
///         .build(),
/// )?;
///
/// let listener = TcpListener::bind("127.0.0.1:9999").await?;
/// server.accept(listener).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Server {
    services: Arc<RwLock<HashMap<String, Arc<Service>>>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service to the table.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DuplicateService`] if the name is taken; the existing
    ///   service stays in place
    /// - [`RpcError::InvalidService`] if the name is empty or contains `.`
    pub fn register(&self, service: Service) -> Result<()> {
        validate_name(service.name()).map_err(|reason| {
            RpcError::InvalidService(format!("service {} {}", service.name(), reason))
        })?;

        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        if services.contains_key(service.name()) {
            return Err(RpcError::DuplicateService(service.name().to_string()));
        }
        info!("rpc server: registered service {}", service.name());
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Registered services, sorted by name.
    pub fn services(&self) -> Vec<Arc<Service>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<_> = services.values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    /// Resolves `"Service.Method"`, splitting on the last `.`.
    pub fn find_method(&self, service_method: &str) -> Result<Arc<MethodType>> {
        let (service_name, method_name) = service_method.rsplit_once('.').ok_or_else(|| {
            RpcError::InvalidService(format!(
                "service/method request ill-formed: {}",
                service_method
            ))
        })?;

        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let service = services.get(service_name).ok_or_else(|| {
            RpcError::InvalidService(format!("can't find service {}", service_name))
        })?;
        service.method(method_name).ok_or_else(|| {
            RpcError::InvalidService(format!("can't find method {}", method_name))
        })
    }

    /// Accepts connections until the listener fails, serving each on its
    /// own task.
    pub async fn accept(&self, listener: TcpListener) -> Result<()> {
        info!("rpc server: listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await.map_err(|e| {
                error!("rpc server: accept error: {}", e);
                RpcError::Connection(format!("Failed to accept connection: {}", e))
            })?;
            debug!("rpc server: accepted {}", peer);

            let server = self.clone();
            tokio::spawn(async move {
                server.serve_conn(stream).await;
            });
        }
    }

    /// Serves one connection until the peer goes away.
    pub async fn serve_conn<S>(&self, mut stream: S)
    where
        S: RpcStream,
    {
        let options = match read_options(&mut stream).await {
            Ok(options) => options,
            Err(e) => {
                warn!("rpc server: options error: {}", e);
                return;
            }
        };

        let codec_type = options.codec_type;
        let (mut reader, writer) = codec_type.new_codec(stream);
        let writer: SharedWriter<S> = Arc::new(Mutex::new(writer));
        let mut units = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    debug!("rpc server: connection done: {}", e);
                    break;
                }
            };
            // the body is consumed even if the request turns out to be
            // unanswerable, so the next header starts on a frame boundary
            let body = match reader.read_raw_body().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("rpc server: read body error: {}", e);
                    break;
                }
            };

            match self.new_request(&header, codec_type, &body) {
                Ok((method, invocation)) => {
                    units.spawn(handle_request(
                        Arc::clone(&writer),
                        codec_type,
                        header,
                        method,
                        invocation,
                        options.handle_timeout,
                    ));
                }
                Err(e) => {
                    debug!("rpc server: rejected {}: {}", header.service_method, e);
                    let header = header.into_error(e.to_string());
                    respond(&writer, codec_type, header, None).await;
                }
            }

            while units.try_join_next().is_some() {}
        }

        while units.join_next().await.is_some() {}
        let mut writer = writer.lock().await;
        if let Err(e) = writer.close().await {
            debug!("rpc server: close error: {}", e);
        }
    }

    fn new_request(
        &self,
        header: &Header,
        codec_type: CodecType,
        body: &[u8],
    ) -> Result<(Arc<MethodType>, Invocation)> {
        let method = self.find_method(&header.service_method)?;
        let invocation = method.new_request(codec_type, body)?;
        Ok((method, invocation))
    }
}

/// Handling unit of one request.
///
/// The method runs on the blocking pool. With a non-zero `timeout` the
/// unit answers with a timeout error if the method has not finished in
/// time; the method keeps running and its late result is dropped, because
/// whichever path claims `answered` first owns the response.
async fn handle_request<S>(
    writer: SharedWriter<S>,
    codec_type: CodecType,
    header: Header,
    method: Arc<MethodType>,
    invocation: Invocation,
    timeout: Duration,
) where
    S: RpcStream,
{
    let answered = Arc::new(AtomicBool::new(false));
    method.record_call();

    let mut worker = {
        let writer = Arc::clone(&writer);
        let answered = Arc::clone(&answered);
        let header = header.clone();
        tokio::spawn(async move {
            let (header, body) = match tokio::task::spawn_blocking(invocation).await {
                Ok(Ok(body)) => (header, Some(body)),
                Ok(Err(msg)) => (header.into_error(msg), None),
                Err(e) => {
                    error!("rpc server: {} panicked: {}", header.service_method, e);
                    let msg = format!("rpc server: method {} panicked", header.service_method);
                    (header.into_error(msg), None)
                }
            };
            respond_once(&writer, &answered, codec_type, header, body).await;
        })
    };

    if timeout.is_zero() {
        let _ = worker.await;
        return;
    }

    if tokio::time::timeout(timeout, &mut worker).await.is_err() {
        warn!(
            "rpc server: {} (seq {}) exceeded {:?}",
            header.service_method, header.seq, timeout
        );
        let header = header.into_error(format!(
            "rpc server: request handle timeout: expect within {:?}",
            timeout
        ));
        respond_once(&writer, &answered, codec_type, header, None).await;
    }
}

/// Writes a response unless one was already written for this request.
///
/// `answered` is checked and set while holding the writer lock.
async fn respond_once<S>(
    writer: &SharedWriter<S>,
    answered: &AtomicBool,
    codec_type: CodecType,
    header: Header,
    body: Option<Vec<u8>>,
) where
    S: RpcStream,
{
    let mut writer = writer.lock().await;
    if answered.swap(true, Ordering::AcqRel) {
        return;
    }
    write_response(&mut writer, codec_type, header, body).await;
}

async fn respond<S>(writer: &SharedWriter<S>, codec_type: CodecType, header: Header, body: Option<Vec<u8>>)
where
    S: RpcStream,
{
    let mut writer = writer.lock().await;
    write_response(&mut writer, codec_type, header, body).await;
}

/// Error responses carry an empty placeholder body.
async fn write_response<S>(
    writer: &mut CodecWriter<WriteHalf<S>>,
    codec_type: CodecType,
    header: Header,
    body: Option<Vec<u8>>,
) where
    S: RpcStream,
{
    let body = match body {
        Some(body) => body,
        None => codec_type.encode(&()).unwrap_or_default(),
    };
    if let Err(e) = writer.write_raw(&header, &body).await {
        error!("rpc server: write response error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Instant;
    use tinyrpc_client::Client;
    use tinyrpc_common::protocol::Options;
    use tinyrpc_common::transport::send_options;

    struct Foo;

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    fn foo_service() -> Service {
        Service::builder(Foo)
            .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
                *reply = args.num1 + args.num2;
                Ok(())
            })
            .unwrap()
            .method("Sleep", |_: &Foo, millis: u64, reply: &mut u64| {
                std::thread::sleep(Duration::from_millis(millis));
                *reply = millis;
                Ok(())
            })
            .unwrap()
            .method("Panic", |_: &Foo, _: (), _: &mut ()| -> anyhow::Result<()> {
                panic!("handler blew up")
            })
            .unwrap()
            .method("Echo", |_: &Foo, data: Vec<u8>, reply: &mut Vec<u8>| {
                *reply = data;
                Ok(())
            })
            .unwrap()
            .build()
    }

    async fn connected(server: &Server, options: Options) -> Client {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let server = server.clone();
        tokio::spawn(async move { server.serve_conn(server_side).await });
        Client::new(client_side, options).await.unwrap()
    }

    fn foo_server() -> Server {
        let server = Server::new();
        server.register(foo_service()).unwrap();
        server
    }

    #[test]
    fn test_duplicate_service_keeps_first() {
        let server = foo_server();
        let err = server.register(Service::builder(Foo).build()).unwrap_err();
        assert_eq!(err, RpcError::DuplicateService("Foo".to_string()));
        assert!(server.find_method("Foo.Sum").is_ok());
    }

    #[test]
    fn test_find_method_errors() {
        let server = foo_server();
        assert_eq!(
            server.find_method("FooSum").unwrap_err().to_string(),
            "rpc server: service/method request ill-formed: FooSum"
        );
        assert_eq!(
            server.find_method("Bar.Sum").unwrap_err().to_string(),
            "rpc server: can't find service Bar"
        );
        assert_eq!(
            server.find_method("Foo.Product").unwrap_err().to_string(),
            "rpc server: can't find method Product"
        );
    }

    #[tokio::test]
    async fn test_request_errors_keep_connection_open() {
        let server = foo_server();
        let client = connected(&server, Options::default()).await;

        let err = client
            .call::<_, i64>("Foo.Product", &Args { num1: 1, num2: 2 })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "rpc server: can't find method Product");

        let err = client.call::<_, i64>("Foo.Sum", "not args").await.unwrap_err();
        assert!(err.to_string().contains("read body err"));

        let sum: i64 = client.call("Foo.Sum", &Args { num1: 3, num2: 4 }).await.unwrap();
        assert_eq!(sum, 7);
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_requests_are_pipelined() {
        let server = foo_server();
        let client = connected(&server, Options::default()).await;

        let slow = client.go::<_, u64>("Foo.Sleep", &200u64).await;
        let fast = client.go::<_, i64>("Foo.Sum", &Args { num1: 1, num2: 1 }).await;

        let started = Instant::now();
        assert_eq!(fast.await.unwrap(), 2);
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(slow.await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_handle_timeout() {
        let server = foo_server();
        let options = Options::default().with_handle_timeout(Duration::from_millis(10));
        let client = connected(&server, options).await;

        let started = Instant::now();
        let err = client.call::<_, u64>("Foo.Sleep", &50u64).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(err.to_string().contains("handle timeout"));
        assert!(err.is_timeout());

        // the late result is dropped and the connection is still in sync
        tokio::time::sleep(Duration::from_millis(80)).await;
        let sum: i64 = client.call("Foo.Sum", &Args { num1: 2, num2: 2 }).await.unwrap();
        assert_eq!(sum, 4);
    }

    #[tokio::test]
    async fn test_timeout_not_triggered_for_fast_method() {
        let server = foo_server();
        let options = Options::default().with_handle_timeout(Duration::from_millis(500));
        let client = connected(&server, options).await;

        let sum: i64 = client.call("Foo.Sum", &Args { num1: 5, num2: 6 }).await.unwrap();
        assert_eq!(sum, 11);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_response() {
        let server = foo_server();
        let client = connected(&server, Options::default()).await;

        let err = client.call::<_, ()>("Foo.Panic", &()).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_call_counts() {
        let server = foo_server();
        let client = connected(&server, Options::default().with_codec(CodecType::Postcard)).await;

        for i in 0..3 {
            let _: i64 = client.call("Foo.Sum", &Args { num1: i, num2: i }).await.unwrap();
        }
        assert_eq!(server.find_method("Foo.Sum").unwrap().num_calls(), 3);
        assert_eq!(server.find_method("Foo.Sleep").unwrap().num_calls(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_go_keeps_connection_in_sync() {
        let server = foo_server();
        let (client_side, server_side) = tokio::io::duplex(4096);
        let client = Client::new(client_side, Options::default()).await.unwrap();

        // nobody reads yet, so the large request cannot be written in time
        let big = vec![7u8; 200_000];
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            client.go::<_, Vec<u8>>("Foo.Echo", &big),
        )
        .await;
        assert!(abandoned.is_err());

        let server = server.clone();
        tokio::spawn(async move { server.serve_conn(server_side).await });

        let sum: i64 = client
            .call_timeout("Foo.Sum", &Args { num1: 3, num2: 4 }, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(sum, 7);
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_in_flight_reply_survives_client_half_close() {
        let server = foo_server();
        let (mut client_side, server_side) = tokio::io::duplex(4096);
        tokio::spawn(async move { server.serve_conn(server_side).await });

        send_options(&mut client_side, &Options::default()).await.unwrap();
        let (mut reader, mut writer) = CodecType::Json.new_codec(client_side);
        writer.write(&Header::request("Foo.Sleep", 1), &100u64).await.unwrap();
        // the server sees end of stream while Sleep is still running
        writer.close().await.unwrap();

        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 1);
        assert!(header.is_ok());
        let reply: u64 = reader.read_body().await.unwrap();
        assert_eq!(reply, 100);

        // then the server closes its side
        assert!(reader.read_header().await.is_err());
    }
}
