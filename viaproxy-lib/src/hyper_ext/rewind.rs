use bytes::{Buf, Bytes};
use pin_project_lite::pin_project;
use std::{
  io,
  pin::Pin,
  task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
  /// Socket wrapper that replays already-consumed bytes before reading from the inner stream.
  /// Used to push a buffered request head back in front of a raw connection.
  #[derive(Debug)]
  pub struct Rewind<S> {
    pre: Option<Bytes>,
    #[pin]
    inner: S,
  }
}

impl<S> Rewind<S> {
  pub fn new(inner: S) -> Self {
    Self { pre: None, inner }
  }

  pub fn new_buffered(inner: S, buf: Bytes) -> Self {
    let pre = if buf.is_empty() { None } else { Some(buf) };
    Self { pre, inner }
  }

  /// Push bytes back in front of anything not yet read
  pub fn rewind(&mut self, bs: Bytes) {
    if bs.is_empty() {
      return;
    }
    self.pre = match self.pre.take() {
      Some(rest) if !rest.is_empty() => {
        let mut joined = Vec::with_capacity(bs.len() + rest.len());
        joined.extend_from_slice(&bs);
        joined.extend_from_slice(&rest);
        Some(joined.into())
      }
      _ => Some(bs),
    };
  }

  pub fn get_ref(&self) -> &S {
    &self.inner
  }
}

impl<S: AsyncRead> AsyncRead for Rewind<S> {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    let this = self.project();
    if let Some(mut prefix) = this.pre.take() {
      // a zero-sized read buffer must not drain the prefix
      if !prefix.is_empty() && buf.remaining() > 0 {
        let copy_len = std::cmp::min(prefix.len(), buf.remaining());
        buf.put_slice(&prefix[..copy_len]);
        prefix.advance(copy_len);
        if !prefix.is_empty() {
          *this.pre = Some(prefix);
        }
        return Poll::Ready(Ok(()));
      }
      if !prefix.is_empty() {
        *this.pre = Some(prefix);
      }
    }
    this.inner.poll_read(cx, buf)
  }
}

impl<S: AsyncWrite> AsyncWrite for Rewind<S> {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    self.project().inner.poll_write(cx, buf)
  }

  fn poll_write_vectored(self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>]) -> Poll<io::Result<usize>> {
    self.project().inner.poll_write_vectored(cx, bufs)
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    self.project().inner.poll_flush(cx)
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    self.project().inner.poll_shutdown(cx)
  }

  fn is_write_vectored(&self) -> bool {
    self.inner.is_write_vectored()
  }
}
