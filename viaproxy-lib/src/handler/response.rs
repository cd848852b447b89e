use super::{pool::Recycle, within_inbound, within_outbound};
use crate::{
  downstream::{Downstream, ResponseWriter},
  error::*,
  inbound::InboundHead,
  log::*,
  message::strip_hop_headers,
  options::{OnResponse, ResponseView},
};
use http::Response;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Relays a plain upstream response to the client
#[derive(Default)]
pub(crate) struct ResponseRelay {
  on_res: Option<OnResponse>,
  timeout: Option<Duration>,
  proxy_timeout: Option<Duration>,
}

impl ResponseRelay {
  pub(crate) fn bind(&mut self, on_res: Option<OnResponse>, timeout: Option<Duration>, proxy_timeout: Option<Duration>) {
    self.on_res = on_res;
    self.timeout = timeout;
    self.proxy_timeout = proxy_timeout;
  }

  /// Errors coming back are either upstream failures, `RequestTimeout` or `DownstreamClosed`
  pub(crate) async fn relay(
    &mut self,
    res: Response<Incoming>,
    head: &InboundHead,
    downstream: &mut Option<Downstream>,
  ) -> ProxyResult<()> {
    if let Some(Downstream::Response(writer)) = downstream.as_mut() {
      return self.relay_response(res, head, writer).await;
    }
    let Some(Downstream::Socket(mut socket)) = downstream.take() else {
      return Ok(());
    };

    // upgrade was asked for but the upstream answered with a plain response
    if let Some(hook) = &self.on_res {
      hook(
        head,
        ResponseView::Socket {
          status: res.status(),
          headers: res.headers(),
        },
      );
    }
    debug!("Upstream answered the upgrade request with {}", res.status());
    if let Err(e) = socket.shutdown().await {
      debug!("Failed to shut down client socket: {e}");
    }
    Ok(())
  }

  async fn relay_response(&self, res: Response<Incoming>, head: &InboundHead, writer: &mut ResponseWriter) -> ProxyResult<()> {
    let (mut parts, mut body) = res.into_parts();
    strip_hop_headers(&mut parts.headers);

    let (status, headers) = writer.head_mut();
    *status = parts.status;
    headers.extend(parts.headers);
    if let Some(hook) = &self.on_res {
      hook(head, ResponseView::Response { status, headers });
    }
    writer.write_head()?;

    loop {
      let next = async { body.frame().await.transpose().map_err(body_error) };
      let Some(frame) = within_outbound(self.proxy_timeout, next).await? else {
        break;
      };
      match frame.into_data() {
        Ok(chunk) => within_inbound(self.timeout, writer.write(chunk)).await?,
        Err(frame) => {
          if let Ok(trailers) = frame.into_trailers() {
            writer.add_trailers(trailers);
          }
        }
      }
    }

    writer.end()?;
    trace!("Response body relayed");
    Ok(())
  }
}

/// Upstream body cut short after the head arrived
fn body_error(e: hyper::Error) -> ProxyError {
  if e.is_incomplete_message() || e.is_canceled() {
    ProxyError::SocketHangUp
  } else {
    ProxyError::Hyper(e)
  }
}

impl Recycle for ResponseRelay {
  fn reset(&mut self) {
    self.on_res = None;
    self.timeout = None;
    self.proxy_timeout = None;
  }
  fn is_inert(&self) -> bool {
    self.on_res.is_none() && self.timeout.is_none() && self.proxy_timeout.is_none()
  }
}
