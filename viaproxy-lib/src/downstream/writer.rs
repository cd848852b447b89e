use crate::{
  error::*,
  hyper_ext::{BodySender, ResponseBody},
};
use futures_channel::oneshot;
use futures_util::FutureExt;
use http::{HeaderMap, Response, StatusCode};
use hyper::body::Bytes;
use std::{
  future::Future,
  pin::Pin,
  task::{Context, Poll},
};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Client-facing structured response.
/// Status and headers are buffered until [`ResponseWriter::write_head`], then the body is streamed
/// into the [`ResponseBody`] handed out by the paired [`ResponseFuture`].
pub struct ResponseWriter {
  status: StatusCode,
  headers: HeaderMap,
  head_tx: Option<oneshot::Sender<Response<ResponseBody>>>,
  body_tx: Option<BodySender>,
  trailers: Option<HeaderMap>,
  closed: CancellationToken,
  ended: bool,
}

/// Resolves with the response head once it is flushed by the writer
pub struct ResponseFuture {
  rx: oneshot::Receiver<Response<ResponseBody>>,
  guard: Option<DropGuard>,
}

impl ResponseWriter {
  pub fn new() -> (Self, ResponseFuture) {
    let (head_tx, rx) = oneshot::channel();
    let closed = CancellationToken::new();
    let writer = Self {
      status: StatusCode::OK,
      headers: HeaderMap::new(),
      head_tx: Some(head_tx),
      body_tx: None,
      trailers: None,
      closed: closed.clone(),
      ended: false,
    };
    let fut = ResponseFuture {
      rx,
      guard: Some(closed.drop_guard()),
    };
    (writer, fut)
  }

  pub fn status_mut(&mut self) -> &mut StatusCode {
    &mut self.status
  }
  pub fn headers_mut(&mut self) -> &mut HeaderMap {
    &mut self.headers
  }
  pub(crate) fn head_mut(&mut self) -> (&mut StatusCode, &mut HeaderMap) {
    (&mut self.status, &mut self.headers)
  }

  /// True once the head has been flushed (or can no longer be)
  pub fn headers_sent(&self) -> bool {
    self.head_tx.is_none()
  }

  /// True once the client side went away or the response was ended
  pub fn is_closed(&self) -> bool {
    self.ended || self.closed.is_cancelled()
  }

  /// Token cancelled when the client drops the response
  pub(crate) fn closed_token(&self) -> CancellationToken {
    self.closed.clone()
  }

  pub fn write_head(&mut self) -> ProxyResult<()> {
    let head_tx = self.head_tx.take().ok_or(ProxyError::DownstreamClosed)?;
    let (body_tx, body) = ResponseBody::channel(false);
    let mut res = Response::new(body);
    *res.status_mut() = self.status;
    *res.headers_mut() = std::mem::take(&mut self.headers);
    head_tx.send(res).map_err(|_| ProxyError::DownstreamClosed)?;
    self.body_tx = Some(body_tx);
    Ok(())
  }

  /// Stream one body chunk, waiting for the reader to be ready when the channel is full
  pub async fn write(&mut self, chunk: Bytes) -> ProxyResult<()> {
    if !self.headers_sent() {
      self.write_head()?;
    }
    let body_tx = self.body_tx.as_mut().ok_or(ProxyError::DownstreamClosed)?;
    match body_tx.try_send_data(chunk) {
      Ok(()) => Ok(()),
      Err(chunk) => body_tx.send_data(chunk).await,
    }
  }

  /// Trailers are sent when the response is ended
  pub fn add_trailers(&mut self, trailers: HeaderMap) {
    match self.trailers.as_mut() {
      Some(t) => t.extend(trailers),
      None => self.trailers = Some(trailers),
    }
  }

  pub fn end(&mut self) -> ProxyResult<()> {
    if !self.headers_sent() {
      self.write_head()?;
    }
    let mut body_tx = self.body_tx.take().ok_or(ProxyError::DownstreamClosed)?;
    if let Some(trailers) = self.trailers.take() {
      body_tx.send_trailers(trailers)?;
    }
    self.ended = true;
    Ok(())
  }

  /// Tear the response down without a clean end
  pub fn destroy(&mut self) {
    if let Some(body_tx) = self.body_tx.take() {
      body_tx.abort();
    }
    self.head_tx = None;
    self.closed.cancel();
  }
}

impl Drop for ResponseWriter {
  fn drop(&mut self) {
    // an unfinished body must not look like a complete one
    if let Some(body_tx) = self.body_tx.take() {
      body_tx.abort();
    }
  }
}

impl std::fmt::Debug for ResponseWriter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResponseWriter")
      .field("status", &self.status)
      .field("headers_sent", &self.headers_sent())
      .field("ended", &self.ended)
      .finish_non_exhaustive()
  }
}

impl Future for ResponseFuture {
  type Output = ProxyResult<Response<ResponseBody>>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match self.rx.poll_unpin(cx) {
      Poll::Pending => Poll::Pending,
      Poll::Ready(Ok(mut res)) => {
        if let Some(guard) = self.guard.take() {
          res.body_mut().attach_guard(guard);
        }
        Poll::Ready(Ok(res))
      }
      Poll::Ready(Err(_)) => {
        self.guard = None;
        Poll::Ready(Err(ProxyError::DownstreamClosed))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::BodyExt;

  #[tokio::test]
  async fn streams_body_and_trailers() {
    let (mut writer, fut) = ResponseWriter::new();
    *writer.status_mut() = StatusCode::CREATED;
    writer.headers_mut().insert("x-a", "1".parse().unwrap());

    let task = tokio::spawn(async move {
      writer.write(Bytes::from_static(b"he")).await.unwrap();
      writer.write(Bytes::from_static(b"llo")).await.unwrap();
      let mut trailers = HeaderMap::new();
      trailers.insert("x-trace", "1".parse().unwrap());
      writer.add_trailers(trailers);
      writer.end().unwrap();
    });

    let res = fut.await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.headers()["x-a"], "1");
    let collected = res.into_body().collect().await.unwrap();
    assert_eq!(collected.trailers().unwrap()["x-trace"], "1");
    assert_eq!(collected.to_bytes(), "hello");
    task.await.unwrap();
  }

  #[tokio::test]
  async fn destroy_before_head_fails_future() {
    let (mut writer, fut) = ResponseWriter::new();
    let token = writer.closed_token();
    writer.destroy();
    assert!(writer.headers_sent());
    assert!(matches!(fut.await, Err(ProxyError::DownstreamClosed)));
    assert!(token.is_cancelled());
  }

  #[tokio::test]
  async fn drop_mid_body_aborts() {
    let (mut writer, fut) = ResponseWriter::new();
    writer.write_head().unwrap();
    drop(writer);
    let res = fut.await.unwrap();
    assert!(res.into_body().collect().await.is_err());
  }

  #[tokio::test]
  async fn write_after_body_dropped_fails() {
    let (mut writer, fut) = ResponseWriter::new();
    writer.write(Bytes::from_static(b"first")).await.unwrap();
    drop(fut.await.unwrap());
    assert!(matches!(
      writer.write(Bytes::from_static(b"second")).await,
      Err(ProxyError::DownstreamClosed)
    ));
  }

  #[tokio::test]
  async fn dropping_response_marks_closed() {
    let (writer, fut) = ResponseWriter::new();
    assert!(!writer.is_closed());
    drop(fut);
    assert!(writer.is_closed());
  }
}
