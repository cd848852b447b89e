use http::{request, Request};
use std::net::SocketAddr;

/// Addresses and transport flags of the client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnInfo {
  /// address the client connected to
  pub local_addr: SocketAddr,
  /// address of the client
  pub remote_addr: SocketAddr,
  /// true if the client connection is encrypted
  pub tls: bool,
}

/// Inbound request: the http request plus the connection it arrived on
#[derive(Debug)]
pub struct Inbound<B> {
  pub req: Request<B>,
  pub conn: ConnInfo,
}

impl<B> Inbound<B> {
  pub fn new(req: Request<B>, conn: ConnInfo) -> Self {
    Self { req, conn }
  }

  /// Split off the body, keeping the head for hooks and logging
  pub(crate) fn into_head_and_body(self) -> (InboundHead, B) {
    let (parts, body) = self.req.into_parts();
    (InboundHead { parts, conn: self.conn }, body)
  }
}

/// Inbound request without its body, handed to hooks and the completion callback
#[derive(Debug)]
pub struct InboundHead {
  pub parts: request::Parts,
  pub conn: ConnInfo,
}

impl InboundHead {
  pub fn method(&self) -> &http::Method {
    &self.parts.method
  }
  pub fn uri(&self) -> &http::Uri {
    &self.parts.uri
  }
  pub fn version(&self) -> http::Version {
    self.parts.version
  }
  pub fn headers(&self) -> &http::HeaderMap {
    &self.parts.headers
  }
}
