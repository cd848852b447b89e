mod writer;

use crate::hyper_ext::Rewind;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::{
  io::{AsyncRead, AsyncWrite, DuplexStream},
  net::TcpStream,
};

pub use writer::{ResponseFuture, ResponseWriter};

/// Raw duplex connection usable as an upgrade endpoint
pub trait RawSocket: AsyncRead + AsyncWrite + Unpin + Send + 'static {
  /// Prepare the socket for a long-lived tunnel: no nagle, keep-alive on.
  fn tune(&self) -> io::Result<()> {
    Ok(())
  }
}

impl RawSocket for TcpStream {
  fn tune(&self) -> io::Result<()> {
    self.set_nodelay(true)?;
    socket2::SockRef::from(self).set_keepalive(true)
  }
}

impl RawSocket for DuplexStream {}

impl RawSocket for TokioIo<Upgraded> {}

impl<S: RawSocket> RawSocket for Rewind<S> {
  fn tune(&self) -> io::Result<()> {
    self.get_ref().tune()
  }
}

impl RawSocket for Box<dyn RawSocket> {
  fn tune(&self) -> io::Result<()> {
    (**self).tune()
  }
}

/// Boxed raw socket with any pushed-back handshake bytes in front
pub type ClientSocket = Rewind<Box<dyn RawSocket>>;

/// Where the result of an exchange goes: a structured response or a raw socket
pub enum Downstream {
  Response(ResponseWriter),
  Socket(ClientSocket),
}

/// Tag of [`Downstream`], handed to the completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownstreamKind {
  Response,
  Socket,
}

impl Downstream {
  pub fn kind(&self) -> DownstreamKind {
    match self {
      Downstream::Response(_) => DownstreamKind::Response,
      Downstream::Socket(_) => DownstreamKind::Socket,
    }
  }
}

impl std::fmt::Debug for Downstream {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Downstream::Response(w) => f.debug_tuple("Response").field(w).finish(),
      Downstream::Socket(_) => f.write_str("Socket"),
    }
  }
}
