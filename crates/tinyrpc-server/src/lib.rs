//! tinyrpc server.
//!
//! Register services on a [`Server`], then serve it on a TCP listener with
//! [`Server::accept`], on an HTTP listener with [`HttpGateway`], or on any
//! stream with [`Server::serve_conn`].

pub mod http_server;
pub mod server;
pub mod service;

pub use http_server::HttpGateway;
pub use server::Server;
pub use service::{Invocation, MethodType, Service, ServiceBuilder};
