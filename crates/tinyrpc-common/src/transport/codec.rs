use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::Header;
use crate::transport::framing::{read_frame, skip_frame, write_frame};

/// Body encoding negotiated during the handshake.
///
/// The set of codecs is closed: every variant has its own encode/decode
/// pair and an unknown tag is rejected when the options are validated.
///
/// # Example
///
/// ```
/// use tinyrpc_common::transport::CodecType;
///
/// let codec: CodecType = "application/postcard".parse().unwrap();
/// let bytes = codec.encode(&(3u32, 4u32)).unwrap();
/// let decoded: (u32, u32) = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, (3, 4));
///
/// assert!("application/gob".parse::<CodecType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodecType {
    /// Self-describing JSON bodies
    #[default]
    Json,
    /// Compact binary bodies
    Postcard,
}

impl CodecType {
    /// Tag used on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CodecType::Json => "application/json",
            CodecType::Postcard => "application/postcard",
        }
    }

    /// Encodes a value with this codec.
    pub fn encode<T>(&self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        match self {
            CodecType::Json => Ok(serde_json::to_vec(value)?),
            CodecType::Postcard => Ok(postcard::to_allocvec(value)?),
        }
    }

    /// Decodes a value with this codec.
    pub fn decode<T>(&self, data: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        match self {
            CodecType::Json => Ok(serde_json::from_slice(data)?),
            CodecType::Postcard => Ok(postcard::from_bytes(data)?),
        }
    }

    /// Splits a connected stream into the reading and writing halves of a codec.
    pub fn new_codec<S>(self, stream: S) -> (CodecReader<ReadHalf<S>>, CodecWriter<WriteHalf<S>>)
    where
        S: AsyncRead + AsyncWrite,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        (
            CodecReader::new(read_half, self),
            CodecWriter::new(write_half, self),
        )
    }
}

impl FromStr for CodecType {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "application/json" => Ok(CodecType::Json),
            "application/postcard" => Ok(CodecType::Postcard),
            other => Err(RpcError::InvalidCodec(other.to_string())),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reading half of a codec.
///
/// Not meant to be shared: exactly one task drives the reads of a
/// connection. Each `read_header` must be followed by exactly one of
/// `read_body`, `read_raw_body` or `discard_body`.
pub struct CodecReader<R> {
    codec_type: CodecType,
    inner: BufReader<R>,
}

impl<R> CodecReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, codec_type: CodecType) -> Self {
        Self {
            codec_type,
            inner: BufReader::new(inner),
        }
    }

    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    pub async fn read_header(&mut self) -> Result<Header> {
        let frame = read_frame(&mut self.inner).await?;
        self.codec_type.decode(&frame)
    }

    /// Decodes the body that follows the last header.
    pub async fn read_body<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let frame = read_frame(&mut self.inner).await?;
        self.codec_type.decode(&frame)
    }

    /// Returns the body bytes undecoded, for callers that decode later.
    pub async fn read_raw_body(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.inner).await
    }

    /// Skips the body that follows the last header.
    pub async fn discard_body(&mut self) -> Result<()> {
        skip_frame(&mut self.inner).await
    }
}

/// Writing half of a codec.
///
/// One `write` puts a complete header + body pair on the wire and flushes.
/// Concurrent writers must serialize access themselves, typically through
/// a mutex owned by the connection.
pub struct CodecWriter<W> {
    codec_type: CodecType,
    inner: BufWriter<W>,
}

impl<W> CodecWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W, codec_type: CodecType) -> Self {
        Self {
            codec_type,
            inner: BufWriter::new(inner),
        }
    }

    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// Encodes and writes one message.
    pub async fn write<T>(&mut self, header: &Header, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let body = self.codec_type.encode(body)?;
        self.write_raw(header, &body).await
    }

    /// Writes one message whose body is already encoded with this codec.
    pub async fn write_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header = self.codec_type.encode(header)?;
        write_frame(&mut self.inner, &header).await?;
        write_frame(&mut self.inner, body).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the write side of the stream.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    #[test]
    fn test_codec_tags() {
        assert_eq!(CodecType::Json.to_string(), "application/json");
        assert_eq!(CodecType::Postcard.to_string(), "application/postcard");
        assert_eq!("application/json".parse::<CodecType>().unwrap(), CodecType::Json);
        assert_eq!(
            "text/plain".parse::<CodecType>(),
            Err(RpcError::InvalidCodec("text/plain".to_string()))
        );
    }

    #[test]
    fn test_json_body_is_readable() {
        let bytes = CodecType::Json.encode(&Args { num1: 3, num2: 4 }).unwrap();
        assert_eq!(bytes, br#"{"num1":3,"num2":4}"#);
    }

    #[test]
    fn test_decode_error_is_codec_error() {
        let result: Result<Args> = CodecType::Postcard.decode(&[0xFF]);
        assert!(matches!(result, Err(RpcError::Codec(_))));
    }

    #[tokio::test]
    async fn test_reader_writer_pairing() {
        for codec in [CodecType::Json, CodecType::Postcard] {
            let (client, server) = tokio::io::duplex(4096);
            let (_, mut writer) = codec.new_codec(client);
            let (mut reader, _) = codec.new_codec(server);

            writer
                .write(&Header::request("Foo.Sum", 1), &Args { num1: 3, num2: 4 })
                .await
                .unwrap();
            writer
                .write(&Header::request("Foo.Sum", 2), &Args { num1: 5, num2: 6 })
                .await
                .unwrap();

            let header = reader.read_header().await.unwrap();
            assert_eq!(header.seq, 1);
            reader.discard_body().await.unwrap();

            let header = reader.read_header().await.unwrap();
            assert_eq!(header.service_method, "Foo.Sum");
            assert_eq!(header.seq, 2);
            let args: Args = reader.read_body().await.unwrap();
            assert_eq!(args, Args { num1: 5, num2: 6 });
        }
    }

    #[tokio::test]
    async fn test_unit_body_for_error_responses() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut writer) = CodecType::Postcard.new_codec(client);
        let (mut reader, _) = CodecType::Postcard.new_codec(server);

        let header = Header::request("Foo.Missing", 4).into_error("rpc server: can't find method Missing");
        writer.write(&header, &()).await.unwrap();

        let received = reader.read_header().await.unwrap();
        assert_eq!(received, header);
        reader.discard_body().await.unwrap();
    }
}
