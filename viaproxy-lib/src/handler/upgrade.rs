use super::pool::Recycle;
use crate::{
  constants::UPGRADE_HEAD_BUF_SIZE,
  downstream::{ClientSocket, RawSocket},
  error::*,
  hyper_ext::Rewind,
  inbound::InboundHead,
  log::*,
  options::{OnResponse, ResponseView},
};
use bytes::{BufMut, BytesMut};
use http::{HeaderMap, Response};
use hyper::{body::Incoming, upgrade::Upgraded};
use hyper_util::rt::TokioIo;
use tokio::{
  io::{copy_bidirectional, AsyncWriteExt},
  net::TcpStream,
};

/// Splices the client socket with the upgraded upstream connection
#[derive(Default)]
pub(crate) struct UpgradeTunnel {
  on_res: Option<OnResponse>,
  /// scratch buffer for the switching protocols head, kept across exchanges
  head_buf: BytesMut,
}

impl UpgradeTunnel {
  pub(crate) fn bind(&mut self, on_res: Option<OnResponse>) {
    self.on_res = on_res;
  }

  /// Returns bytes copied (client to upstream, upstream to client)
  pub(crate) async fn run(
    &mut self,
    mut res: Response<Incoming>,
    head: &InboundHead,
    mut client: ClientSocket,
  ) -> ProxyResult<(u64, u64)> {
    let upgraded = hyper::upgrade::on(&mut res).await?;
    let mut upstream = into_raw_socket(upgraded);
    if let Err(e) = upstream.tune() {
      debug!("Failed to tune upstream socket: {e}");
    }

    let mut headers = std::mem::take(res.headers_mut());
    if let Some(hook) = &self.on_res {
      hook(head, ResponseView::Upgrade { headers: &mut headers });
    }

    write_switching_head(&mut self.head_buf, &headers);
    client.write_all(&self.head_buf).await?;
    client.flush().await?;
    debug!("Tunnel opened");

    let copied = copy_bidirectional(&mut client, &mut upstream).await?;
    debug!("Tunnel closed: {} bytes up, {} bytes down", copied.0, copied.1);
    Ok(copied)
  }
}

/// Recover the upstream tcp stream with its unread bytes, or keep the upgraded io as is
fn into_raw_socket(upgraded: Upgraded) -> Box<dyn RawSocket> {
  match upgraded.downcast::<TokioIo<TcpStream>>() {
    Ok(parts) => Box::new(Rewind::new_buffered(parts.io.into_inner(), parts.read_buf)),
    Err(upgraded) => Box::new(TokioIo::new(upgraded)),
  }
}

/// Status line and every header value on its own line, then the blank line
fn write_switching_head(buf: &mut BytesMut, headers: &HeaderMap) {
  buf.clear();
  buf.reserve(UPGRADE_HEAD_BUF_SIZE);
  buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
  for (name, value) in headers.iter() {
    buf.put_slice(name.as_str().as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
  }
  buf.put_slice(b"\r\n");
}

impl Recycle for UpgradeTunnel {
  fn reset(&mut self) {
    self.on_res = None;
    self.head_buf.clear();
  }
  fn is_inert(&self) -> bool {
    self.on_res.is_none() && self.head_buf.is_empty()
  }
}
