use crate::{config::ListenConfig, constants::*, count::ConnectionCount, log::*};
use bytes::{Bytes, BytesMut};
use http::{HeaderName, HeaderValue, Method, Request, Version};
use http_body_util::Empty;
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
  rt::{TokioExecutor, TokioIo},
  server::conn::auto::Builder as ConnectionBuilder,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
  io::AsyncReadExt,
  net::{TcpSocket, TcpStream},
};
use viaproxy_lib::{ConnInfo, HttpProxy, Inbound, Options, Rewind};

/// Bind TCP socket to the given `SocketAddr` with `SO_REUSEADDR` and `SO_REUSEPORT`.
fn bind_tcp_socket(listening_on: &SocketAddr) -> std::io::Result<TcpSocket> {
  let tcp_socket = if listening_on.is_ipv6() {
    TcpSocket::new_v6()
  } else {
    TcpSocket::new_v4()
  }?;
  tcp_socket.set_reuseaddr(true)?;
  tcp_socket.set_reuseport(true)?;

  tcp_socket.bind(*listening_on).map_err(|e| {
    error!("Failed to bind TCP socket: {}", e);
    e
  })?;

  Ok(tcp_socket)
}

/// Outcome of peeking at the first bytes of a client connection
enum Sniffed {
  /// complete request head carrying `Upgrade`, and its length in bytes
  Upgrade(Request<Empty<Bytes>>, usize),
  /// anything else goes through the http server
  Plain,
  NeedMore,
}

fn sniff(buf: &[u8]) -> Sniffed {
  let mut headers = [httparse::EMPTY_HEADER; SNIFF_MAX_HEADERS];
  let mut parsed = httparse::Request::new(&mut headers);
  let head_len = match parsed.parse(buf) {
    Ok(httparse::Status::Complete(len)) => len,
    Ok(httparse::Status::Partial) if buf.len() < SNIFF_MAX_HEAD_SIZE => return Sniffed::NeedMore,
    _ => return Sniffed::Plain,
  };
  if !parsed.headers.iter().any(|h| h.name.eq_ignore_ascii_case("upgrade")) {
    return Sniffed::Plain;
  }

  let (Some(method), Some(path)) = (parsed.method, parsed.path) else {
    return Sniffed::Plain;
  };
  let Ok(method) = Method::from_bytes(method.as_bytes()) else {
    return Sniffed::Plain;
  };
  let version = match parsed.version {
    Some(1) => Version::HTTP_11,
    _ => Version::HTTP_10,
  };
  let mut builder = Request::builder().method(method).uri(path).version(version);
  for h in parsed.headers.iter() {
    let (Ok(name), Ok(value)) = (HeaderName::from_bytes(h.name.as_bytes()), HeaderValue::from_bytes(h.value)) else {
      return Sniffed::Plain;
    };
    builder = builder.header(name, value);
  }
  match builder.body(Empty::new()) {
    Ok(req) => Sniffed::Upgrade(req, head_len),
    Err(_) => Sniffed::Plain,
  }
}

/// Proxy main object accepting clients on one socket address
#[derive(Clone)]
pub struct Listener {
  listening_on: SocketAddr,
  tcp_listen_backlog: u32,
  max_clients: usize,
  connection_count: ConnectionCount,
  connection_builder: Arc<ConnectionBuilder<TokioExecutor>>,
  proxy: HttpProxy,
  options: Options,
}

impl Listener {
  pub fn new(
    listening_on: SocketAddr,
    listen_config: &ListenConfig,
    connection_count: ConnectionCount,
    proxy: HttpProxy,
    options: Options,
  ) -> Self {
    Self {
      listening_on,
      tcp_listen_backlog: listen_config.tcp_listen_backlog,
      max_clients: listen_config.max_clients,
      connection_count,
      connection_builder: Arc::new(ConnectionBuilder::new(TokioExecutor::new())),
      proxy,
      options,
    }
  }

  pub async fn start(&self) -> std::io::Result<()> {
    let tcp_socket = bind_tcp_socket(&self.listening_on)?;
    let tcp_listener = tcp_socket.listen(self.tcp_listen_backlog)?;
    info!("Start TCP proxy serving on {}", self.listening_on);
    loop {
      let (stream, client_addr) = tcp_listener.accept().await?;
      self.serve_connection(stream, client_addr);
    }
  }

  fn serve_connection(&self, stream: TcpStream, remote_addr: SocketAddr) {
    let Some(slot) = self.connection_count.try_acquire(self.max_clients) else {
      warn!("Too many clients, dropping connection from {remote_addr}");
      return;
    };
    trace!("Connection incoming: current # {}", self.connection_count.current());

    let self_clone = self.clone();
    tokio::spawn(async move {
      if let Err(e) = self_clone.handle_connection(stream, remote_addr).await {
        debug!("Connection from {remote_addr} closed with error: {e}");
      }
      drop(slot);
      trace!("Connection closed: current # {}", self_clone.connection_count.current());
    });
  }

  async fn handle_connection(&self, mut stream: TcpStream, remote_addr: SocketAddr) -> anyhow::Result<()> {
    let conn = ConnInfo {
      local_addr: stream.local_addr()?,
      remote_addr,
      tls: false,
    };

    let mut buf = BytesMut::with_capacity(1024);
    let upgrade = loop {
      if stream.read_buf(&mut buf).await? == 0 {
        if buf.is_empty() {
          return Ok(());
        }
        break None;
      }
      match sniff(&buf) {
        Sniffed::NeedMore => continue,
        Sniffed::Plain => break None,
        Sniffed::Upgrade(req, head_len) => break Some((req, head_len)),
      }
    };

    if let Some((req, head_len)) = upgrade {
      let head = buf.split_off(head_len).freeze();
      self
        .proxy
        .proxy_upgrade(Inbound::new(req, conn), stream, head, self.options.clone(), None)
        .await?;
      return Ok(());
    }

    let proxy = self.proxy.clone();
    let options = self.options.clone();
    let io = TokioIo::new(Rewind::new_buffered(stream, buf.freeze()));
    self
      .connection_builder
      .serve_connection(
        io,
        service_fn(move |req: Request<Incoming>| {
          let proxy = proxy.clone();
          let options = options.clone();
          async move { proxy.serve_http(Inbound::new(req, conn), options).await }
        }),
      )
      .await
      .map_err(|e| anyhow::anyhow!(e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sniff_websocket_handshake() {
    let raw = b"GET /chat HTTP/1.1\r\nHost: a\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\nearly";
    match sniff(raw) {
      Sniffed::Upgrade(req, len) => {
        assert_eq!(req.uri(), "/chat");
        assert_eq!(req.headers()["upgrade"], "websocket");
        assert_eq!(&raw[len..], b"early");
      }
      _ => panic!("expected an upgrade"),
    }
  }

  #[test]
  fn sniff_plain_and_partial() {
    assert!(matches!(sniff(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n"), Sniffed::Plain));
    assert!(matches!(sniff(b"GET / HTTP/1.1\r\nUpgr"), Sniffed::NeedMore));
    assert!(matches!(sniff(b"\x00\x01garbage\r\n\r\n"), Sniffed::Plain));
  }
}
