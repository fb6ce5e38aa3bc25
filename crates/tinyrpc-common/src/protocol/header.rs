//! Per-message envelope.
//!
//! Every request and every response on the wire is a `(Header, Body)` pair.
//! The header is always encoded on its own so the reader can decide what to
//! do with the body (decode it, or skip it) before touching it.

use serde::{Deserialize, Serialize};

/// Sequence number of a call within one connection. `0` is never assigned.
pub type Seq = u64;

/// Message header shared by requests and responses.
///
/// # Fields
///
/// - `service_method`: target in `"Service.Method"` form
/// - `seq`: sequence number chosen by the client, echoed by the server
/// - `error`: empty on success, otherwise the failure text from the server
///
/// # Example
///
/// ```
/// use tinyrpc_common::protocol::Header;
///
/// let header = Header::request("Foo.Sum", 1);
/// assert!(header.is_ok());
///
/// let failed = header.into_error("rpc server: can't find method Sum");
/// assert!(!failed.is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub service_method: String,
    pub seq: Seq,
    pub error: String,
}

impl Header {
    /// Creates a request header with an empty error field.
    pub fn request(service_method: impl Into<String>, seq: Seq) -> Self {
        Header {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Turns this header into an error response header.
    pub fn into_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// Whether the header reports success.
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    /// Splits `service_method` on its last `.` into `(service, method)`.
    pub fn split_service_method(&self) -> Option<(&str, &str)> {
        let dot = self.service_method.rfind('.')?;
        Some((&self.service_method[..dot], &self.service_method[dot + 1..]))
    }
}
