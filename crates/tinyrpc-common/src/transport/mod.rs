//! tinyrpc Transport Layer
//!
//! # Wire Format
//!
//! A connection starts with one options frame (see [`handshake`]), after
//! which it carries `(Header, Body)` pairs. Header and body are each one
//! frame: `[4-byte length prefix as u32 big-endian] + [encoded payload]`,
//! encoded with the codec named in the options.
//!
//! # Components
//!
//! - **[`CodecType`]**: closed set of body encodings
//! - **[`CodecReader`]** / **[`CodecWriter`]**: the two halves of a codec over a stream
//! - **[`handshake`]**: options exchange
//! - **[`http`]**: CONNECT tunnel constants and client helpers
//!
//! # Message Size Limits
//!
//! Frames larger than [`MAX_MESSAGE_SIZE`] are rejected on both sides.

pub mod codec;
pub mod framing;
pub mod handshake;
pub mod http;

pub use codec::{CodecReader, CodecType, CodecWriter};
pub use framing::MAX_MESSAGE_SIZE;
pub use handshake::{read_options, send_options};

use tokio::io::{AsyncRead, AsyncWrite};

/// Any byte stream a connection can run over: TCP, an upgraded HTTP
/// connection, an in-memory duplex pipe.
pub trait RpcStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RpcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased stream, so clients over different transports share one type.
pub type BoxedStream = Box<dyn RpcStream>;
