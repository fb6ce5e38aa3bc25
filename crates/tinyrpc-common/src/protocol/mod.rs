pub mod error;
pub mod header;
pub mod options;

pub use error::{Result, RpcError};
pub use header::{Header, Seq};
pub use options::{Options, WireOptions, DEFAULT_CONNECT_TIMEOUT, MAGIC_NUMBER};
