use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tinyrpc_common::protocol::error::{Result, RpcError};
use tinyrpc_common::protocol::Seq;
use tinyrpc_common::transport::CodecType;
use tokio::sync::oneshot;

/// Completion slot of one outstanding call: the raw reply body, or the error
/// that completed the call.
pub(crate) type ReplySender = oneshot::Sender<Result<Vec<u8>>>;

/// Handle to one issued call.
///
/// Resolves exactly once, to the decoded reply or to the error that
/// completed the call (server error, connection teardown, rejected issue).
/// The reply body is decoded on the caller's side, with the codec of the
/// connection the call was issued on.
///
/// Dropping a `Call` abandons it; a late response is then drained by the
/// client's receive loop and ignored.
#[must_use = "a Call does nothing unless awaited"]
pub struct Call<R> {
    seq: Seq,
    service_method: String,
    codec_type: CodecType,
    rx: oneshot::Receiver<Result<Vec<u8>>>,
    _reply: PhantomData<fn() -> R>,
}

impl<R> Call<R> {
    pub(crate) fn new(
        seq: Seq,
        service_method: String,
        codec_type: CodecType,
        rx: oneshot::Receiver<Result<Vec<u8>>>,
    ) -> Self {
        Self {
            seq,
            service_method,
            codec_type,
            rx,
            _reply: PhantomData,
        }
    }

    /// Sequence number assigned at issue time, `0` if the call was rejected
    /// before registration.
    pub fn seq(&self) -> Seq {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Waits for completion without decoding the reply.
    pub async fn discard(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(RpcError::ShutDown),
        }
    }
}

impl<R> Future for Call<R>
where
    R: DeserializeOwned,
{
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(body))) => Poll::Ready(this.codec_type.decode(&body)),
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
            // sender dropped without completing: the client went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::ShutDown)),
        }
    }
}
