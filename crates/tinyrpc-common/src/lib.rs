//! tinyrpc Common Types and Transport
//!
//! This crate provides the wire protocol shared by the tinyrpc client and
//! server.
//!
//! # Architecture
//!
//! - **Handshake**: one length-prefixed JSON [`Options`] frame per connection
//! - **Messages**: `(Header, Body)` pairs, each a length-prefixed frame
//! - **Codecs**: JSON or postcard, chosen per connection
//! - **Max Message Size**: 100 MB
//!
//! # Components
//!
//! - [`protocol`] - Header, options and the error type
//! - [`transport`] - framing, codecs, handshake and HTTP tunnel helpers
//!
//! # Example
//!
//! ```
//! use tinyrpc_common::{Header, Options, RpcError};
//! use tinyrpc_common::transport::CodecType;
//!
//! let options = Options::default().with_codec(CodecType::Postcard);
//! let header = Header::request("Foo.Sum", 1);
//! let bytes = options.codec_type.encode(&header).unwrap();
//! let decoded: Header = options.codec_type.decode(&bytes).unwrap();
//! assert_eq!(decoded, header);
//! # let _ = RpcError::ShutDown;
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::{BoxedStream, CodecType, RpcStream};
