//! HTTP front door for the RPC server.
//!
//! # Architecture
//!
//! The gateway:
//! - Listens on a TCP socket for HTTP/1.x connections
//! - Spawns a tokio task for each connection
//! - Upgrades `CONNECT` requests on the RPC path and hands the raw stream
//!   to [`Server::serve_conn`]
//! - Serves a plain-text listing of services and call counts on the
//!   debug path
//!
//! # Example
//!
//! ```no_run
//! use tinyrpc_server::{HttpGateway, Server};
//! use tokio::net::TcpListener;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::new();
//! let listener = TcpListener::bind("127.0.0.1:9998").await?;
//! HttpGateway::new(server).run(listener).await?;
//! # Ok(())
//! # }
//! ```

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::sync::Arc;
use tinyrpc_common::protocol::error::{Result, RpcError};
use tinyrpc_common::transport::http::{CONNECTED_REASON, DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::server::Server;

type HyperResponse = Response<Full<Bytes>>;

/// Serves the RPC tunnel and the debug page over HTTP.
pub struct HttpGateway {
    server: Server,
    rpc_path: String,
    debug_path: String,
}

impl HttpGateway {
    /// Creates a gateway on the default RPC and debug paths.
    pub fn new(server: Server) -> Self {
        Self {
            server,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            debug_path: DEFAULT_DEBUG_PATH.to_string(),
        }
    }

    pub fn with_rpc_path(mut self, path: impl Into<String>) -> Self {
        self.rpc_path = path.into();
        self
    }

    pub fn with_debug_path(mut self, path: impl Into<String>) -> Self {
        self.debug_path = path.into();
        self
    }

    /// Accepts HTTP connections until the listener fails.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        info!(
            "rpc server: HTTP gateway listening on {} (rpc {}, debug {})",
            listener.local_addr()?,
            self.rpc_path,
            self.debug_path
        );
        let gateway = Arc::new(self);

        loop {
            let (stream, _) = listener.accept().await.map_err(|e| {
                RpcError::Connection(format!("Failed to accept connection: {}", e))
            })?;

            let io = TokioIo::new(stream);
            let gateway = Arc::clone(&gateway);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { Ok::<_, Infallible>(gateway.handle_request(req)) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    error!("Error serving connection: {}", err);
                }
            });
        }
    }

    fn handle_request(&self, req: Request<Incoming>) -> HyperResponse {
        let path = req.uri().path();

        if path == self.rpc_path {
            if req.method() != Method::CONNECT {
                return text_response(StatusCode::METHOD_NOT_ALLOWED, "405 must CONNECT\n".to_string());
            }
            self.tunnel(req);
            let mut response = Response::new(Full::new(Bytes::new()));
            response
                .extensions_mut()
                .insert(hyper::ext::ReasonPhrase::from_static(CONNECTED_REASON.as_bytes()));
            return response;
        }

        if path == self.debug_path && req.method() == Method::GET {
            return text_response(StatusCode::OK, render_debug(&self.server));
        }

        text_response(StatusCode::NOT_FOUND, "404 page not found\n".to_string())
    }

    /// Serves RPC on the connection once hyper has handed it over.
    fn tunnel(&self, req: Request<Incoming>) {
        let server = self.server.clone();
        tokio::task::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    debug!("rpc server: tunnel established");
                    server.serve_conn(TokioIo::new(upgraded)).await;
                }
                Err(e) => error!("rpc server: upgrade error: {}", e),
            }
        });
    }
}

fn text_response(status: StatusCode, body: String) -> HyperResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Plain-text listing of every service, its methods and their call counts.
pub fn render_debug(server: &Server) -> String {
    let mut out = String::from("tinyrpc services\n");
    for service in server.services() {
        let _ = writeln!(out, "\nService {}", service.name());
        for method in service.methods() {
            let _ = writeln!(out, "  {:<24} calls: {}", method.name(), method.num_calls());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Service;
    use serde::{Deserialize, Serialize};
    use tinyrpc_client::Client;
    use tinyrpc_common::protocol::Options;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Foo;

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    async fn start_gateway() -> (Server, String) {
        let server = Server::new();
        server
            .register(
                Service::builder(Foo)
                    .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
                        *reply = args.num1 + args.num2;
                        Ok(())
                    })
                    .unwrap()
                    .build(),
            )
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(HttpGateway::new(server.clone()).run(listener));
        (server, addr)
    }

    async fn raw_request(addr: &str, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_call_through_tunnel() {
        let (_server, addr) = start_gateway().await;

        let client = Client::dial_http(&addr, Options::default()).await.unwrap();
        let sum: i64 = client.call("Foo.Sum", &Args { num1: 3, num2: 4 }).await.unwrap();
        assert_eq!(sum, 7);
    }

    #[tokio::test]
    async fn test_rpc_path_requires_connect() {
        let (_server, addr) = start_gateway().await;

        let response = raw_request(
            &addr,
            "GET /_tinyrpc_ HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 405"));
        assert!(response.ends_with("405 must CONNECT\n"));
    }

    #[tokio::test]
    async fn test_debug_page_lists_calls() {
        let (_server, addr) = start_gateway().await;

        let client = Client::xdial(&format!("http@{}", addr), Options::default())
            .await
            .unwrap();
        let _: i64 = client.call("Foo.Sum", &Args { num1: 1, num2: 1 }).await.unwrap();

        let response = raw_request(
            &addr,
            "GET /debug/tinyrpc HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("Service Foo"));
        assert!(response.contains("calls: 1"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (_server, addr) = start_gateway().await;

        let response = raw_request(
            &addr,
            "GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn test_render_debug_empty() {
        assert_eq!(render_debug(&Server::new()), "tinyrpc services\n");
    }
}
