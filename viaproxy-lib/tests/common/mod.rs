#![allow(dead_code)]

use std::{net::SocketAddr, time::Duration};
use tokio::{
  io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
  net::TcpListener,
  sync::mpsc,
};
use viaproxy_lib::{ConnInfo, Inbound, Options, OptionsBuilder};

pub fn conn() -> ConnInfo {
  ConnInfo {
    local_addr: "127.0.0.1:8080".parse().unwrap(),
    remote_addr: "10.1.2.3:50000".parse().unwrap(),
    tls: false,
  }
}

pub fn inbound<B>(req: http::Request<B>) -> Inbound<B> {
  Inbound::new(req, conn())
}

pub fn options(upstream: SocketAddr) -> OptionsBuilder {
  let mut builder = OptionsBuilder::default();
  builder.hostname(upstream.ip().to_string()).port(upstream.port());
  builder
}

pub fn build(builder: &OptionsBuilder) -> Options {
  builder.build().unwrap()
}

/// Reads byte by byte up to and including the blank line ending a message head
pub async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> String {
  let mut head = Vec::new();
  let mut byte = [0u8; 1];
  while !head.ends_with(b"\r\n\r\n") {
    if stream.read(&mut byte).await.unwrap() == 0 {
      break;
    }
    head.push(byte[0]);
  }
  String::from_utf8_lossy(&head).into_owned()
}

/// Upstream answering every request with the same raw bytes. Received request heads are forwarded to the returned channel.
pub async fn canned_upstream(response: &'static [u8]) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(async move {
    while let Ok((mut stream, _)) = listener.accept().await {
      let tx = tx.clone();
      tokio::spawn(async move {
        let head = read_head(&mut stream).await;
        let _ = tx.send(head);
        let _ = stream.write_all(response).await;
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
      });
    }
  });
  (addr, rx)
}

/// Upstream that reads the request head and then never answers
pub async fn silent_upstream(hold: Duration) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    if let Ok((mut stream, _)) = listener.accept().await {
      let _ = read_head(&mut stream).await;
      tokio::time::sleep(hold).await;
    }
  });
  addr
}

/// Upstream that reads the request head, writes `partial`, keeps the connection open for `hold` and then closes it
pub async fn truncated_upstream(partial: &'static [u8], hold: Duration) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    if let Ok((mut stream, _)) = listener.accept().await {
      let _ = read_head(&mut stream).await;
      let _ = stream.write_all(partial).await;
      tokio::time::sleep(hold).await;
    }
  });
  addr
}

/// Upstream accepting a websocket handshake, then echoing everything back
pub async fn echo_ws_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(async move {
    let Ok((mut stream, _)) = listener.accept().await else {
      return;
    };
    let head = read_head(&mut stream).await;
    let _ = tx.send(head);
    let _ = stream
      .write_all(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: abc\r\n\r\n")
      .await;
    let (mut rd, mut wr) = stream.split();
    let _ = tokio::io::copy(&mut rd, &mut wr).await;
  });
  (addr, rx)
}

/// Address nothing listens on
pub async fn closed_port() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  listener.local_addr().unwrap()
}
