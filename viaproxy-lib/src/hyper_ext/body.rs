use crate::error::*;
use futures_channel::{mpsc, oneshot};
use futures_util::{ready, stream::FusedStream, task::AtomicWaker, Future, Stream};
use http::HeaderMap;
use hyper::body::{Body, Bytes, Frame};
use std::{
  pin::Pin,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  task::{Context, Poll},
};
use tokio_util::sync::DropGuard;

type DataSender = mpsc::Sender<Result<Bytes, ProxyError>>;
type TrailersSender = oneshot::Sender<HeaderMap>;

////////////////////////////////////////////////////////////
/// Response body handed to the caller, fed chunk by chunk by the response writer.
/// Data is sent through a zero-buffer channel, so a slow reader applies backpressure to the upstream read.
/// Trailers are delivered once the data channel is closed.
pub struct ResponseBody {
  want: WantSignal,
  data_rx: mpsc::Receiver<Result<Bytes, ProxyError>>,
  trailers_rx: oneshot::Receiver<HeaderMap>,
  /// cancels the downstream-closed token when the body is dropped
  closed_guard: Option<DropGuard>,
}

/// Sending half of [`ResponseBody`]
pub(crate) struct BodySender {
  want: WantSignal,
  data_tx: DataSender,
  trailers_tx: Option<TrailersSender>,
}

const CLOSED: usize = 0;
const WANT_PENDING: usize = 1;
const WANT_READY: usize = 2;

/// Single-value signal telling the sender whether the reader has started polling
#[derive(Clone)]
struct WantSignal {
  shared: Arc<WantShared>,
}
struct WantShared {
  state: AtomicUsize,
  waker: AtomicWaker,
}

impl WantSignal {
  fn new(initial: usize) -> Self {
    Self {
      shared: Arc::new(WantShared {
        state: AtomicUsize::new(initial),
        waker: AtomicWaker::new(),
      }),
    }
  }
  fn set(&self, state: usize) {
    if self.shared.state.swap(state, Ordering::SeqCst) != state {
      self.shared.waker.wake();
    }
  }
  fn poll_state(&self, cx: &mut Context<'_>) -> usize {
    self.shared.waker.register(cx.waker());
    self.shared.state.load(Ordering::SeqCst)
  }
}

impl ResponseBody {
  /// Create a body with its sender half.
  /// If `wanter` is true, the sender is not ready until the body has been polled once.
  pub(crate) fn channel(wanter: bool) -> (BodySender, ResponseBody) {
    let (data_tx, data_rx) = mpsc::channel(0);
    let (trailers_tx, trailers_rx) = oneshot::channel();
    let want = WantSignal::new(if wanter { WANT_PENDING } else { WANT_READY });

    let tx = BodySender {
      want: want.clone(),
      data_tx,
      trailers_tx: Some(trailers_tx),
    };
    let rx = ResponseBody {
      want,
      data_rx,
      trailers_rx,
      closed_guard: None,
    };
    (tx, rx)
  }

  /// Empty body, already at its end
  #[cfg(test)]
  pub(crate) fn empty() -> ResponseBody {
    let (_, rx) = Self::channel(false);
    rx
  }

  pub(crate) fn attach_guard(&mut self, guard: DropGuard) {
    self.closed_guard = Some(guard);
  }
}

impl Drop for ResponseBody {
  fn drop(&mut self) {
    self.want.set(CLOSED);
  }
}

impl Body for ResponseBody {
  type Data = Bytes;
  type Error = ProxyError;

  fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
    self.want.set(WANT_READY);

    if !self.data_rx.is_terminated() {
      if let Some(chunk) = ready!(Pin::new(&mut self.data_rx).poll_next(cx)?) {
        return Poll::Ready(Some(Ok(Frame::data(chunk))));
      }
    }

    // trailers come after data is terminated
    match ready!(Pin::new(&mut self.trailers_rx).poll(cx)) {
      Ok(t) => Poll::Ready(Some(Ok(Frame::trailers(t)))),
      Err(_) => Poll::Ready(None),
    }
  }
}

impl std::fmt::Debug for ResponseBody {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResponseBody").finish_non_exhaustive()
  }
}

impl BodySender {
  /// Check to see if this sender can send more data.
  pub(crate) fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<ProxyResult<()>> {
    match self.want.poll_state(cx) {
      WANT_READY => (),
      WANT_PENDING => return Poll::Pending,
      _ => return Poll::Ready(Err(ProxyError::DownstreamClosed)),
    }
    self.data_tx.poll_ready(cx).map_err(|_| ProxyError::DownstreamClosed)
  }

  async fn ready(&mut self) -> ProxyResult<()> {
    futures_util::future::poll_fn(|cx| self.poll_ready(cx)).await
  }

  /// Send data once the reader is ready for it.
  pub(crate) async fn send_data(&mut self, chunk: Bytes) -> ProxyResult<()> {
    self.ready().await?;
    self.data_tx.try_send(Ok(chunk)).map_err(|_| ProxyError::DownstreamClosed)
  }

  /// Try to send data without waiting. Returns the chunk back if the channel is full or closed.
  pub(crate) fn try_send_data(&mut self, chunk: Bytes) -> Result<(), Bytes> {
    self.data_tx.try_send(Ok(chunk)).map_err(|err| match err.into_inner() {
      Ok(chunk) => chunk,
      Err(_) => Bytes::new(),
    })
  }

  /// Queue trailers, delivered after the last data frame.
  pub(crate) fn send_trailers(&mut self, trailers: HeaderMap) -> ProxyResult<()> {
    let Some(tx) = self.trailers_tx.take() else {
      return Err(ProxyError::DownstreamClosed);
    };
    tx.send(trailers).map_err(|_| ProxyError::DownstreamClosed)
  }

  /// Abort the body so that the reader sees an error instead of a clean end.
  pub(crate) fn abort(mut self) {
    self.trailers_tx = None;
    let _ = self
      .data_tx
      // clone so the send works even if buffer is full
      .clone()
      .try_send(Err(ProxyError::BodyWriteAborted));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::BodyExt;
  use std::task::Poll;

  #[tokio::test]
  async fn channel_abort() {
    let (tx, mut rx) = ResponseBody::channel(false);
    tx.abort();
    match rx.frame().await.unwrap() {
      Err(ProxyError::BodyWriteAborted) => (),
      unexpected => panic!("unexpected: {:?}", unexpected),
    };
  }

  #[tokio::test]
  async fn channel_abort_when_buffer_is_full() {
    let (mut tx, mut rx) = ResponseBody::channel(false);

    tx.try_send_data("chunk 1".into()).expect("send 1");
    // buffer is full, but abort still goes through
    tx.abort();

    let chunk1 = rx.frame().await.expect("item 1").expect("chunk 1").into_data().unwrap();
    assert_eq!(chunk1, "chunk 1");
    match rx.frame().await.unwrap() {
      Err(ProxyError::BodyWriteAborted) => (),
      unexpected => panic!("unexpected: {:?}", unexpected),
    };
  }

  #[test]
  fn channel_buffers_one() {
    let (mut tx, _rx) = ResponseBody::channel(false);
    tx.try_send_data("chunk 1".into()).expect("send 1");
    let chunk2 = tx.try_send_data("chunk 2".into()).expect_err("send 2");
    assert_eq!(chunk2, "chunk 2");
  }

  #[tokio::test]
  async fn channel_empty() {
    let mut rx = ResponseBody::empty();
    assert!(rx.frame().await.is_none());
  }

  #[tokio::test]
  async fn trailers_follow_data() {
    let (mut tx, rx) = ResponseBody::channel(false);
    let mut trailers = HeaderMap::new();
    trailers.insert("x-trace", "1".parse().unwrap());

    let reader = tokio::spawn(async move { rx.collect().await.unwrap() });
    tx.send_data("ok".into()).await.unwrap();
    tx.send_trailers(trailers).unwrap();
    drop(tx);

    let collected = reader.await.unwrap();
    assert_eq!(collected.trailers().unwrap()["x-trace"], "1");
    assert_eq!(collected.to_bytes(), "ok");
  }

  #[test]
  fn channel_wanter() {
    let (mut tx, mut rx) = ResponseBody::channel(true);

    let mut tx_ready = tokio_test::task::spawn(tx.ready());
    let mut rx_data = tokio_test::task::spawn(rx.frame());

    assert!(tx_ready.poll().is_pending(), "tx isn't ready before rx has been polled");
    assert!(rx_data.poll().is_pending(), "poll rx.data");
    assert!(tx_ready.is_woken(), "rx poll wakes tx");
    assert!(tx_ready.poll().is_ready(), "tx is ready after rx has been polled");
  }

  #[test]
  fn channel_notices_closure() {
    let (mut tx, rx) = ResponseBody::channel(true);

    let mut tx_ready = tokio_test::task::spawn(tx.ready());
    assert!(tx_ready.poll().is_pending(), "tx isn't ready before rx has been polled");

    drop(rx);
    assert!(tx_ready.is_woken(), "dropping rx wakes tx");
    match tx_ready.poll() {
      Poll::Ready(Err(ProxyError::DownstreamClosed)) => (),
      unexpected => panic!("tx poll ready unexpected: {:?}", unexpected),
    }
  }

  #[test]
  fn dropping_body_fires_guard() {
    let token = tokio_util::sync::CancellationToken::new();
    let (_tx, mut rx) = ResponseBody::channel(false);
    rx.attach_guard(token.clone().drop_guard());
    assert!(!token.is_cancelled());
    drop(rx);
    assert!(token.is_cancelled());
  }
}
