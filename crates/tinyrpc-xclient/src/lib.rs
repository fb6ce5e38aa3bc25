//! Client-side load balancing for tinyrpc.
//!
//! A [`Discovery`] supplies server addresses; an [`XClient`] picks one per
//! call according to a [`SelectMode`], keeps one [`Client`](tinyrpc_client::Client)
//! per address, and can broadcast a call to every known server.

pub mod discovery;
pub mod xclient;

pub use discovery::{Discovery, MultiServersDiscovery, SelectMode};
pub use xclient::XClient;
