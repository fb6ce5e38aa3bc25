//! Connection options exchanged once at connection start.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::error::{Result, RpcError};
use crate::transport::codec::CodecType;

/// Marks a connection as speaking the tinyrpc protocol.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default time allowed for connect + handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection-level options.
///
/// Sent by the dialing side before any codec framing. The accepting side
/// rejects the connection if the magic number is wrong or the codec is
/// unknown. A zero duration disables the corresponding timeout.
///
/// # Default Configuration
///
/// - `magic_number`: [`MAGIC_NUMBER`]
/// - `codec_type`: [`CodecType::Json`]
/// - `connect_timeout`: 10 seconds
/// - `handle_timeout`: disabled
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tinyrpc_common::protocol::Options;
/// use tinyrpc_common::transport::CodecType;
///
/// let options = Options::default()
///     .with_codec(CodecType::Postcard)
///     .with_handle_timeout(Duration::from_secs(1));
/// assert_eq!(options.codec_type, CodecType::Postcard);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: CodecType,
    pub connect_timeout: Duration,
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::Json,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn with_codec(mut self, codec_type: CodecType) -> Self {
        self.codec_type = codec_type;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Wire representation of these options.
    pub fn to_wire(&self) -> WireOptions {
        WireOptions {
            magic_number: self.magic_number,
            codec_type: self.codec_type.as_str().to_string(),
            connect_timeout_ms: ceil_millis(self.connect_timeout),
            handle_timeout_ms: ceil_millis(self.handle_timeout),
        }
    }
}

/// Whole milliseconds, rounded up so a non-zero timeout never becomes zero.
fn ceil_millis(d: Duration) -> u64 {
    let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    if Duration::from_millis(ms) < d {
        ms.saturating_add(1)
    } else {
        ms
    }
}

/// Options as they travel on the wire.
///
/// The codec is kept as a plain string here so an unknown codec can be told
/// apart from a document that does not decode at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireOptions {
    pub magic_number: u32,
    pub codec_type: String,
    #[serde(default)]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub handle_timeout_ms: u64,
}

impl WireOptions {
    /// Validates the document in handshake order: magic number, then codec.
    pub fn validate(self) -> Result<Options> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::Handshake(format!(
                "invalid magic number {:#x}",
                self.magic_number
            )));
        }
        let codec_type = self.codec_type.parse::<CodecType>()?;
        Ok(Options {
            magic_number: self.magic_number,
            codec_type,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            handle_timeout: Duration::from_millis(self.handle_timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = Options::default();
        assert_eq!(options.magic_number, 0x3bef5c);
        assert_eq!(options.codec_type, CodecType::Json);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.handle_timeout, Duration::ZERO);
    }

    #[test]
    fn test_wire_validation_accepts_own_output() {
        let options = Options::default()
            .with_codec(CodecType::Postcard)
            .with_handle_timeout(Duration::from_millis(250));
        assert_eq!(options.to_wire().validate().unwrap(), options);
    }

    #[test]
    fn test_wire_validation_rejects_magic() {
        let mut wire = Options::default().to_wire();
        wire.magic_number = 0x1234;
        assert!(matches!(wire.validate(), Err(RpcError::Handshake(_))));
    }

    #[test]
    fn test_wire_validation_rejects_codec() {
        let mut wire = Options::default().to_wire();
        wire.codec_type = "application/gob".to_string();
        assert_eq!(
            wire.validate(),
            Err(RpcError::InvalidCodec("application/gob".to_string()))
        );
    }

    #[test]
    fn test_wire_json_shape() {
        let json = serde_json::to_value(Options::default().to_wire()).unwrap();
        assert_eq!(json["magic_number"], 3927900);
        assert_eq!(json["codec_type"], "application/json");
        assert_eq!(json["connect_timeout_ms"], 10000);
        assert_eq!(json["handle_timeout_ms"], 0);
    }

    #[test]
    fn test_sub_millisecond_timeout_stays_enabled() {
        let options = Options::default()
            .with_connect_timeout(Duration::from_micros(1500))
            .with_handle_timeout(Duration::from_micros(500));
        let wire = options.to_wire();
        assert_eq!(wire.connect_timeout_ms, 2);
        assert_eq!(wire.handle_timeout_ms, 1);
        assert_eq!(wire.validate().unwrap().handle_timeout, Duration::from_millis(1));
    }
}
