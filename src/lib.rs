//! tinyrpc
//!
//! A minimal RPC framework: a length-prefixed wire protocol with pluggable
//! codecs, a concurrent client that multiplexes calls over one connection,
//! a concurrent server with per-request handling timeouts, and client-side
//! load balancing with broadcast.
//!
//! # Crates
//!
//! - [`common`] - wire codec, handshake, header, options, errors
//! - [`client`] - the call engine and dialing
//! - [`server`] - service registration, dispatch, HTTP gateway
//! - [`xclient`] - discovery and the load-balanced client
//!
//! # Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use tinyrpc::{Client, Options, Server, Service};
//! use tokio::net::TcpListener;
//!
//! struct Foo;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::new();
//! server.register(
//!     Service::builder(Foo)
//!         .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
//!             *reply = args.num1 + args.num2;
//!             Ok(())
//!         })?
//!         .build(),
//! )?;
//!
//! let listener = TcpListener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?.to_string();
//! tokio::spawn(async move { server.accept(listener).await });
//!
//! let client = Client::dial(&addr, Options::default()).await?;
//! let sum: i64 = client.call("Foo.Sum", &Args { num1: 3, num2: 4 }).await?;
//! assert_eq!(sum, 7);
//! # Ok(())
//! # }
//! ```

pub use tinyrpc_client as client;
pub use tinyrpc_common as common;
pub use tinyrpc_server as server;
pub use tinyrpc_xclient as xclient;

pub use tinyrpc_client::{Call, Client};
pub use tinyrpc_common::{CodecType, Header, Options, Result, RpcError};
pub use tinyrpc_server::{HttpGateway, Server, Service};
pub use tinyrpc_xclient::{Discovery, MultiServersDiscovery, SelectMode, XClient};
