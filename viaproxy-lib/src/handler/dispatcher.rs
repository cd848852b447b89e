use super::{
  client_error::ClientErrorReporter,
  lifecycle::{HandlerKind, LifecycleTracker},
  pool::{Pool, Pooled},
  response::ResponseRelay,
  upgrade::UpgradeTunnel,
  upstream_error::{Classified, UpstreamErrorClassifier},
  within_inbound, within_outbound,
};
use crate::{
  constants::{CLIENT_READ_AHEAD_LIMIT, HANDLER_POOL_CAPACITY},
  downstream::{ClientSocket, Downstream, DownstreamKind, RawSocket, ResponseWriter},
  error::*,
  forwarder::OutboundRequest,
  hyper_ext::{boxed, BoxError, RequestBody, ResponseBody, Rewind},
  inbound::{Inbound, InboundHead},
  log::*,
  message::{append_header_entry_with_comma, build_outbound_headers, is_websocket_upgrade, loop_detected, HttpMessageLog},
  options::{Callback, Options, OutboundOptions},
};
use bytes::{Bytes, BytesMut};
use derive_builder::Builder;
use http::{header, Method, Response, StatusCode, Version};
use hyper::body::{Body, Incoming};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{io::AsyncReadExt, runtime::Handle};

/// One pool per handler kind, shared by every exchange of a proxy
pub(crate) struct HandlerPools {
  lifecycle: Arc<Pool<LifecycleTracker>>,
  client_error: Arc<Pool<ClientErrorReporter>>,
  upstream_error: Arc<Pool<UpstreamErrorClassifier>>,
  response: Arc<Pool<ResponseRelay>>,
  upgrade: Arc<Pool<UpgradeTunnel>>,
}

impl HandlerPools {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      lifecycle: Arc::new(Pool::new(capacity)),
      client_error: Arc::new(Pool::new(capacity)),
      upstream_error: Arc::new(Pool::new(capacity)),
      response: Arc::new(Pool::new(capacity)),
      upgrade: Arc::new(Pool::new(capacity)),
    }
  }
}

/// Snapshot of the handler pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
  pub lifecycle: usize,
  pub client_error: usize,
  pub upstream_error: usize,
  pub response: usize,
  pub upgrade: usize,
  /// pooled instances still holding exchange state, zero unless something leaked
  pub bound: usize,
}

/// Forwarding core. Cheap to clone, every clone shares the same handler pools.
#[derive(Clone, Builder)]
pub struct HttpProxy {
  #[builder(setter(custom), default = "Arc::new(HandlerPools::new(HANDLER_POOL_CAPACITY))")]
  pools: Arc<HandlerPools>,
  #[builder(setter(strip_option), default)]
  /// runtime used to drive upstream connections, the current one if not given
  runtime_handle: Option<Handle>,
}

impl HttpProxyBuilder {
  /// Max number of idle handler instances kept per kind
  pub fn pool_capacity(&mut self, capacity: usize) -> &mut Self {
    self.pools = Some(Arc::new(HandlerPools::new(capacity)));
    self
  }
}

impl Default for HttpProxy {
  fn default() -> Self {
    Self::new()
  }
}

impl HttpProxy {
  pub fn new() -> Self {
    Self {
      pools: Arc::new(HandlerPools::new(HANDLER_POOL_CAPACITY)),
      runtime_handle: None,
    }
  }

  fn runtime(&self) -> Handle {
    self.runtime_handle.clone().unwrap_or_else(Handle::current)
  }

  /// Proxy a plain http request, writing the outcome into `writer`.
  /// Without a callback, a reported error is returned as `Err` after the client has been answered.
  pub async fn proxy_http<B>(
    &self,
    inbound: Inbound<B>,
    writer: ResponseWriter,
    options: Options,
    callback: Option<Callback>,
  ) -> ProxyResult<()>
  where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
  {
    self
      .dispatch(inbound, Downstream::Response(writer), options, callback)
      .await
  }

  /// Proxy a websocket upgrade handshake arriving on a raw socket.
  /// `head` holds bytes already read past the request head, pushed back in front of the socket.
  pub async fn proxy_upgrade<B, S>(
    &self,
    inbound: Inbound<B>,
    socket: S,
    head: Bytes,
    options: Options,
    callback: Option<Callback>,
  ) -> ProxyResult<()>
  where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
    S: RawSocket,
  {
    let socket: ClientSocket = Rewind::new_buffered(Box::new(socket), head);
    self.dispatch(inbound, Downstream::Socket(socket), options, callback).await
  }

  /// Hyper service helper: proxies in a spawned task and resolves once the client response head is ready
  pub async fn serve_http<B>(&self, inbound: Inbound<B>, options: Options) -> ProxyResult<Response<ResponseBody>>
  where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
  {
    let (writer, fut) = ResponseWriter::new();
    let proxy = self.clone();
    self.spawn(async move {
      if let Err(e) = proxy.proxy_http(inbound, writer, options, None).await {
        debug!("Proxied request ended with error: {e}");
      }
    });
    fut.await
  }

  pub fn pool_stats(&self) -> PoolStats {
    let p = &self.pools;
    PoolStats {
      lifecycle: p.lifecycle.idle(),
      client_error: p.client_error.idle(),
      upstream_error: p.upstream_error.idle(),
      response: p.response.idle(),
      upgrade: p.upgrade.idle(),
      bound: p.lifecycle.bound() + p.client_error.bound() + p.upstream_error.bound() + p.response.bound() + p.upgrade.bound(),
    }
  }

  fn spawn<F>(&self, fut: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.runtime().spawn(fut);
  }

  async fn dispatch<B>(
    &self,
    inbound: Inbound<B>,
    downstream: Downstream,
    options: Options,
    callback: Option<Callback>,
  ) -> ProxyResult<()>
  where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
  {
    // the tracker exists before anything registers into it
    let lifecycle = self.pools.lifecycle.acquire();
    let (head, body) = inbound.into_head_and_body();
    let closed = match &downstream {
      Downstream::Response(writer) => Some(writer.closed_token()),
      Downstream::Socket(_) => None,
    };

    let mut exchange = Exchange {
      log: HttpMessageLog::from(&head),
      kind: downstream.kind(),
      head,
      downstream: Some(downstream),
      options,
      runtime: self.runtime(),
      pools: self.pools.clone(),
      lifecycle,
      reporter: None,
      classifier: None,
      relay: None,
      tunnel: None,
      client_gone: false,
    };
    exchange.bind_reporter(callback);

    let client_closed = match closed {
      Some(closed) => {
        tokio::select! {
          _ = exchange.drive(boxed(body)) => false,
          _ = closed.cancelled() => true,
        }
      }
      None => {
        exchange.drive(boxed(body)).await;
        false
      }
    };
    exchange.finish(client_closed)
  }
}

fn client_socket(downstream: &mut Option<Downstream>) -> Option<&mut ClientSocket> {
  match downstream {
    Some(Downstream::Socket(socket)) => Some(socket),
    _ => None,
  }
}

/// Awaits `fut` while reading ahead on the raw client socket, so a hang-up before the tunnel exists ends the exchange.
/// Bytes read meanwhile are pushed back in front of the socket.
async fn watch_client<T, F>(socket: Option<&mut ClientSocket>, fut: F) -> ProxyResult<T>
where
  F: Future<Output = ProxyResult<T>>,
{
  let Some(socket) = socket else {
    return fut.await;
  };
  tokio::pin!(fut);
  let mut early = BytesMut::new();
  let result = loop {
    if early.len() >= CLIENT_READ_AHEAD_LIMIT {
      break (&mut fut).await;
    }
    tokio::select! {
      res = &mut fut => break res,
      read = socket.read_buf(&mut early) => match read {
        Ok(0) => break Err(ProxyError::DownstreamClosed),
        Ok(_) => continue,
        Err(e) => {
          debug!("Client socket failed before the tunnel: {e}");
          break Err(ProxyError::DownstreamClosed);
        }
      },
    }
  };
  socket.rewind(early.freeze());
  result
}

/// Per-request state, alive from dispatch entry until every handler is released
struct Exchange {
  head: InboundHead,
  downstream: Option<Downstream>,
  kind: DownstreamKind,
  options: Options,
  runtime: Handle,
  pools: Arc<HandlerPools>,
  lifecycle: Pooled<LifecycleTracker>,
  reporter: Option<Pooled<ClientErrorReporter>>,
  classifier: Option<Pooled<UpstreamErrorClassifier>>,
  relay: Option<Pooled<ResponseRelay>>,
  tunnel: Option<Pooled<UpgradeTunnel>>,
  /// set once a hang-up of the client was seen from inside `drive`
  client_gone: bool,
  log: HttpMessageLog,
}

impl Exchange {
  fn bind_reporter(&mut self, callback: Option<Callback>) {
    let mut reporter = self.pools.client_error.acquire();
    reporter.bind(callback);
    self.lifecycle.register(HandlerKind::ClientError);
    self.reporter = Some(reporter);
  }

  fn is_upgrade(&self) -> bool {
    self.kind == DownstreamKind::Socket
  }

  /// Checks run before any outbound connection exists
  fn validate(&self) -> ProxyResult<()> {
    let parts = &self.head.parts;
    if self.is_upgrade() {
      if parts.method != Method::GET {
        return Err(ProxyError::BadRequest("upgrade requires GET"));
      }
      if !is_websocket_upgrade(&parts.headers) {
        return Err(ProxyError::BadRequest("only websocket upgrades are supported"));
      }
    }
    if parts.version != Version::HTTP_11 && parts.version != Version::HTTP_2 {
      return Err(ProxyError::HttpVersionNotSupported(parts.version));
    }
    if let Some(name) = self.options.via_name() {
      if loop_detected(&parts.headers, name) {
        return Err(ProxyError::LoopDetected(name.to_string()));
      }
    }
    Ok(())
  }

  fn outbound_options(&self) -> ProxyResult<OutboundOptions> {
    let mut headers = build_outbound_headers(&self.head.parts, &self.head.conn)?;
    if let Some(name) = self.options.via_name() {
      append_header_entry_with_comma(&mut headers, header::VIA, name)?;
    }
    let mut outbound = OutboundOptions::new(&self.head, &self.options, headers);
    if let Some(hook) = &self.options.on_req {
      hook(&self.head, &mut outbound);
    }
    Ok(outbound)
  }

  /// Runs the exchange to its terminal outcome. Every failure ends in the client error reporter.
  async fn drive(&mut self, body: RequestBody) {
    if let Err(e) = self.validate() {
      self.report(e, None);
      return;
    }

    // inbound idle timeout only guards the http path; a tunnel has no idle limit
    let timeout = if self.is_upgrade() { None } else { self.options.timeout };
    if let Some(Downstream::Socket(socket)) = &self.downstream {
      if let Err(e) = socket.tune() {
        debug!("Failed to tune client socket: {e}");
      }
    }

    let outbound = match self.outbound_options() {
      Ok(o) => o,
      Err(e) => return self.report(e, None),
    };
    let authority = outbound.authority();
    let proxy_timeout = outbound.timeout;
    self.log.upstream(&authority);

    self.classifier = Some(self.pools.upstream_error.acquire());
    self.lifecycle.register(HandlerKind::UpstreamError);

    let req = match outbound.into_request(body) {
      Ok(req) => req,
      Err(e) => return self.report(e, None),
    };

    let connect = within_inbound(timeout, within_outbound(proxy_timeout, OutboundRequest::connect(&authority, &self.runtime)));
    let conn = match watch_client(client_socket(&mut self.downstream), connect).await {
      Ok(conn) => conn,
      Err(e) => return self.route(e),
    };
    if let Some(classifier) = self.classifier.as_mut() {
      classifier.bind(conn.abort_handle());
    }
    debug!("Outbound request issued: {} {} -> {}", req.method(), req.uri(), authority);

    let send = within_inbound(timeout, within_outbound(proxy_timeout, conn.send(req)));
    let res = match watch_client(client_socket(&mut self.downstream), send).await {
      Ok(res) => res,
      Err(e) => return self.route(e),
    };
    self.log.status_code(&res.status());

    let switching = res.status() == StatusCode::SWITCHING_PROTOCOLS;
    match (self.kind, switching) {
      (DownstreamKind::Socket, true) => self.open_tunnel(res).await,
      (DownstreamKind::Response, true) => self.upstream_failure(ProxyError::UnexpectedUpgrade),
      (_, false) => self.relay_response(res, timeout, proxy_timeout).await,
    }
  }

  async fn relay_response(&mut self, res: Response<Incoming>, timeout: Option<Duration>, proxy_timeout: Option<Duration>) {
    let mut relay = self.pools.response.acquire();
    relay.bind(self.options.on_res.clone(), timeout, proxy_timeout);
    self.lifecycle.register(HandlerKind::Response);
    let relay = self.relay.insert(relay);

    let result = relay.relay(res, &self.head, &mut self.downstream).await;
    match result {
      Ok(()) => debug!("Response relayed"),
      Err(e) => self.route(e),
    }
  }

  async fn open_tunnel(&mut self, res: Response<Incoming>) {
    let Some(Downstream::Socket(client)) = self.downstream.take() else {
      return;
    };
    let mut tunnel = self.pools.upgrade.acquire();
    tunnel.bind(self.options.on_res.clone());
    self.lifecycle.register(HandlerKind::Upgrade);
    let tunnel = self.tunnel.insert(tunnel);
    self.log.tunnel();

    let result = tunnel.run(res, &self.head, client).await;
    if let Err(e) = result {
      self.upstream_failure(e);
    }
  }

  /// Send a failure to the component that owns it
  fn route(&mut self, err: ProxyError) {
    match err {
      ProxyError::RequestTimeout => {
        if let Some(reporter) = self.reporter.as_mut() {
          reporter.request_timeout(&self.head, &mut self.downstream, self.kind);
        }
      }
      ProxyError::DownstreamClosed => {
        debug!("Client went away");
        self.client_gone = true;
      }
      err => self.upstream_failure(err),
    }
  }

  fn upstream_failure(&mut self, err: ProxyError) {
    let verdict = match self.classifier.as_mut() {
      Some(classifier) => classifier.classify(&err),
      None => Classified::Report(None),
    };
    match verdict {
      Classified::Report(status) => self.report(err, status),
      Classified::Ignore => debug!("Upstream error not reported: {err}"),
    }
  }

  fn report(&mut self, err: ProxyError, status: Option<StatusCode>) {
    if let Some(reporter) = self.reporter.as_mut() {
      reporter.report(err, status, &self.head, &mut self.downstream, self.kind);
    }
  }

  /// Releases every registered handler once, in registration order, and writes the access log
  fn finish(mut self, client_closed: bool) -> ProxyResult<()> {
    if client_closed || self.client_gone {
      debug!("Client closed before the exchange completed");
    }
    let (unhandled, written) = match self.reporter.as_mut() {
      Some(r) => (r.take_unhandled(), r.written_status()),
      None => (None, None),
    };
    if let Some(status) = written {
      self.log.status_code(&status);
    }

    if let Some(order) = self.lifecycle.fire() {
      for kind in order {
        match kind {
          HandlerKind::ClientError => self.reporter.take().map(Pooled::release),
          HandlerKind::UpstreamError => self.classifier.take().map(Pooled::release),
          HandlerKind::Response => self.relay.take().map(Pooled::release),
          HandlerKind::Upgrade => self.tunnel.take().map(Pooled::release),
        };
      }
      trace!("Exchange handlers released");
    }
    drop(self.downstream.take());
    self.log.output();

    match unhandled {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
