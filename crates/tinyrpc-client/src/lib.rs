//! tinyrpc client.
//!
//! A [`Client`] owns one connection and multiplexes any number of
//! concurrent calls over it. Calls are matched to responses by sequence
//! number, so responses may arrive in any order.

pub mod call;
pub mod client;
pub mod dial;

pub use call::Call;
pub use client::Client;
