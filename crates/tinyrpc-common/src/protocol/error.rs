use thiserror::Error;

/// Errors produced anywhere in the RPC stack.
///
/// Every variant carries owned strings so the error is `Clone`: a single
/// connection failure has to be delivered to every call still pending on
/// that connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The client was closed by the user or its connection has failed.
    #[error("connection is shut down")]
    ShutDown,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("invalid codec type {0}")]
    InvalidCodec(String),

    /// Error text reported by the remote side in `Header::error`, kept verbatim.
    #[error("{0}")]
    Server(String),

    #[error("{0}")]
    Timeout(String),

    #[error("rpc: service already defined: {0}")]
    DuplicateService(String),

    #[error("rpc server: {0}")]
    InvalidService(String),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    #[error("rpc client: wrong format '{0}', expect protocol@addr")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Message too large: {0} bytes (max {1} bytes)")]
    MessageTooLarge(usize, usize),
}

impl RpcError {
    /// Returns `true` for errors that leave the connection unusable.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, RpcError::ShutDown | RpcError::Connection(_))
    }

    /// Returns `true` when the error is a client or server side deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            RpcError::Timeout(_) => true,
            RpcError::Server(msg) => msg.contains("timeout"),
            _ => false,
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Codec(err.to_string())
    }
}

impl From<postcard::Error> for RpcError {
    fn from(err: postcard::Error) -> Self {
        RpcError::Codec(err.to_string())
    }
}

impl From<std::net::AddrParseError> for RpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        RpcError::InvalidAddress(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
