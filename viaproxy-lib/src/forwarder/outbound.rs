use crate::{error::*, hyper_ext::RequestBody, log::*};
use http::{Request, Response};
use hyper::{body::Incoming, client::conn::http1};
use hyper_util::rt::TokioIo;
use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};
use tokio::{
  net::{lookup_host, TcpStream},
  runtime::Handle,
};
use tokio_util::sync::CancellationToken;

/// Shared abort switch of one outbound request.
/// Aborting tears down the upstream connection task; repeated calls are no-ops.
#[derive(Clone, Debug, Default)]
pub(crate) struct AbortHandle {
  aborted: Arc<AtomicBool>,
  token: CancellationToken,
}

impl AbortHandle {
  /// Returns true only for the call that actually aborted
  pub(crate) fn abort(&self) -> bool {
    if self.aborted.swap(true, Ordering::SeqCst) {
      return false;
    }
    self.token.cancel();
    true
  }

  pub(crate) fn is_aborted(&self) -> bool {
    self.aborted.load(Ordering::SeqCst)
  }
}

/// One http/1.1 connection to the upstream carrying exactly one request
pub(crate) struct OutboundRequest {
  sender: http1::SendRequest<RequestBody>,
  abort: AbortHandle,
}

impl OutboundRequest {
  /// Resolve and connect to `authority`, then spawn the connection driver on `runtime`
  pub(crate) async fn connect(authority: &str, runtime: &Handle) -> ProxyResult<Self> {
    let addrs = lookup_host(authority)
      .await
      .map_err(|e| ProxyError::UpstreamNotFound(authority.to_string(), e))?
      .collect::<Vec<_>>();
    if addrs.is_empty() {
      let e = std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved");
      return Err(ProxyError::UpstreamNotFound(authority.to_string(), e));
    }

    let mut last_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved");
    let mut stream = None;
    for addr in addrs {
      match TcpStream::connect(addr).await {
        Ok(s) => {
          stream = Some(s);
          break;
        }
        Err(e) => {
          debug!("Failed to connect {addr} for {authority}: {e}");
          last_err = e;
        }
      }
    }
    let Some(stream) = stream else {
      return Err(ProxyError::UpstreamConnect(authority.to_string(), last_err));
    };
    stream.set_nodelay(true)?;

    let (sender, conn) = http1::Builder::new().handshake(TokioIo::new(stream)).await?;

    let abort = AbortHandle::default();
    let token = abort.token.clone();
    let authority = authority.to_string();
    runtime.spawn(async move {
      tokio::select! {
        res = conn.with_upgrades() => {
          if let Err(e) = res {
            debug!("Upstream connection to {authority} closed with error: {e}");
          }
        }
        _ = token.cancelled() => {
          debug!("Upstream connection to {authority} aborted");
        }
      }
    });

    Ok(Self { sender, abort })
  }

  pub(crate) fn abort_handle(&self) -> AbortHandle {
    self.abort.clone()
  }

  /// Issue the request. The inbound body is streamed by the connection task.
  pub(crate) async fn send(mut self, req: Request<RequestBody>) -> ProxyResult<Response<Incoming>> {
    self.sender.ready().await?;
    let res = self.sender.send_request(req).await?;
    Ok(res)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn abort_is_idempotent() {
    let handle = AbortHandle::default();
    let shared = handle.clone();
    assert!(!shared.is_aborted());
    assert!(handle.abort());
    assert!(!shared.abort());
    assert!(shared.is_aborted());
    assert!(handle.token.is_cancelled());
  }

  #[tokio::test]
  async fn refused_connect_is_classified() {
    // grab a free port and release it so nothing listens there
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = OutboundRequest::connect(&addr.to_string(), &Handle::current())
      .await
      .err()
      .unwrap();
    assert_eq!(err.code(), Some(ErrorCode::ConnectionRefused));
  }
}
