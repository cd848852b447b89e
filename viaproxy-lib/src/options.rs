use crate::{
  constants::DEFAULT_UPSTREAM_PORT,
  downstream::DownstreamKind,
  error::*,
  hyper_ext::RequestBody,
  inbound::InboundHead,
};
use derive_builder::Builder;
use http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Version};
use std::{sync::Arc, time::Duration};

/// Hook invoked just before the outbound request is sent
pub type OnRequest = Arc<dyn Fn(&InboundHead, &mut OutboundOptions) + Send + Sync>;
/// Hook invoked just before the upstream response or upgrade is relayed
pub type OnResponse = Arc<dyn Fn(&InboundHead, ResponseView<'_>) + Send + Sync>;
/// Completion hook receiving the reported error, the inbound request and the kind of client destination
pub type Callback = Box<dyn FnOnce(ProxyError, &InboundHead, DownstreamKind) + Send>;

/// What the response hook gets to see, depending on the client destination
#[derive(Debug)]
pub enum ResponseView<'a> {
  /// structured response, status and headers not flushed yet
  Response {
    status: &'a mut StatusCode,
    headers: &'a mut HeaderMap,
  },
  /// raw socket whose upgrade request was answered with a plain response
  Socket { status: StatusCode, headers: &'a HeaderMap },
  /// raw socket about to receive `101 Switching Protocols` with these headers
  Upgrade { headers: &'a mut HeaderMap },
}

/// Per-call forwarding options
#[derive(Builder, Clone)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Options {
  #[builder(setter(into))]
  /// upstream host name or ip address
  pub hostname: String,
  #[builder(default = "DEFAULT_UPSTREAM_PORT")]
  /// upstream port
  pub port: u16,
  #[builder(setter(strip_option), default)]
  /// inbound idle timeout, answered with 408
  pub timeout: Option<Duration>,
  #[builder(setter(strip_option), default)]
  /// outbound idle timeout, answered with 504
  pub proxy_timeout: Option<Duration>,
  #[builder(setter(into, strip_option), default)]
  /// proxy identifier appended to `Via` and used for loop detection
  pub proxy_name: Option<String>,
  #[builder(setter(custom), default)]
  pub on_req: Option<OnRequest>,
  #[builder(setter(custom), default)]
  pub on_res: Option<OnResponse>,
}

impl OptionsBuilder {
  pub fn on_req(&mut self, hook: impl Fn(&InboundHead, &mut OutboundOptions) + Send + Sync + 'static) -> &mut Self {
    self.on_req = Some(Some(Arc::new(hook)));
    self
  }
  pub fn on_res(&mut self, hook: impl Fn(&InboundHead, ResponseView<'_>) + Send + Sync + 'static) -> &mut Self {
    self.on_res = Some(Some(Arc::new(hook)));
    self
  }
  fn validate(&self) -> Result<(), String> {
    if let Some(h) = &self.hostname {
      if h.trim().is_empty() {
        return Err("hostname must not be empty".to_string());
      }
    }
    // a blank name would match every `Via` entry
    if let Some(Some(name)) = &self.proxy_name {
      if name.trim().is_empty() {
        return Err("proxy_name must not be blank".to_string());
      }
    }
    Ok(())
  }
}

impl Options {
  /// Configured proxy name, blank values count as unset
  pub(crate) fn via_name(&self) -> Option<&str> {
    self.proxy_name.as_deref().filter(|name| !name.trim().is_empty())
  }
}

impl std::fmt::Debug for Options {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Options")
      .field("hostname", &self.hostname)
      .field("port", &self.port)
      .field("timeout", &self.timeout)
      .field("proxy_timeout", &self.proxy_timeout)
      .field("proxy_name", &self.proxy_name)
      .field("on_req", &self.on_req.is_some())
      .field("on_res", &self.on_res.is_some())
      .finish()
  }
}

/// Outbound request descriptor, built fresh for each exchange
#[derive(Debug, Clone)]
pub struct OutboundOptions {
  pub method: Method,
  pub hostname: String,
  pub port: u16,
  /// path and query in origin form
  pub path: String,
  pub headers: HeaderMap,
  pub timeout: Option<Duration>,
}

impl OutboundOptions {
  pub(crate) fn new(head: &InboundHead, options: &Options, headers: HeaderMap) -> Self {
    Self {
      method: head.parts.method.clone(),
      hostname: options.hostname.clone(),
      port: options.port,
      path: head
        .parts
        .uri
        .path_and_query()
        .map_or_else(|| "/", |pq| pq.as_str())
        .to_string(),
      headers,
      timeout: options.proxy_timeout,
    }
  }

  /// `host:port` with ipv6 literals bracketed
  pub fn authority(&self) -> String {
    format!("{}:{}", self.host_literal(), self.port)
  }

  fn host_literal(&self) -> String {
    if self.hostname.contains(':') && !self.hostname.starts_with('[') {
      format!("[{}]", self.hostname)
    } else {
      self.hostname.clone()
    }
  }

  /// Value used for `Host` when the inbound request carried none
  fn default_host(&self) -> String {
    if self.port == DEFAULT_UPSTREAM_PORT {
      self.host_literal()
    } else {
      self.authority()
    }
  }

  /// Build the http/1.1 request sent on the upstream connection
  pub(crate) fn into_request(self, body: RequestBody) -> ProxyResult<Request<RequestBody>> {
    let host = self.default_host();
    let mut req = Request::builder()
      .method(self.method)
      .uri(self.path)
      .version(Version::HTTP_11)
      .body(body)?;
    *req.headers_mut() = self.headers;
    if !req.headers().contains_key(header::HOST) {
      let value = HeaderValue::from_str(&host).map_err(|_| ProxyError::InvalidHeader(format!("host: {host}")))?;
      req.headers_mut().insert(header::HOST, value);
    }
    Ok(req)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hyper_ext::empty;

  #[test]
  fn builder_defaults() {
    let options = OptionsBuilder::default().hostname("backend").build().unwrap();
    assert_eq!(options.port, DEFAULT_UPSTREAM_PORT);
    assert!(options.timeout.is_none());
    assert!(options.proxy_timeout.is_none());
    assert!(options.proxy_name.is_none());
    assert!(options.on_req.is_none());
  }

  #[test]
  fn builder_requires_hostname() {
    assert!(OptionsBuilder::default().build().is_err());
    assert!(OptionsBuilder::default().hostname(" ").build().is_err());
  }

  #[test]
  fn builder_rejects_blank_proxy_name() {
    assert!(OptionsBuilder::default().hostname("backend").proxy_name("").build().is_err());
    assert!(OptionsBuilder::default().hostname("backend").proxy_name("  ").build().is_err());
    let options = OptionsBuilder::default().hostname("backend").proxy_name("edge").build().unwrap();
    assert_eq!(options.via_name(), Some("edge"));

    let unchecked = Options {
      proxy_name: Some(String::new()),
      ..options
    };
    assert_eq!(unchecked.via_name(), None);
  }

  fn outbound(hostname: &str, port: u16) -> OutboundOptions {
    OutboundOptions {
      method: Method::GET,
      hostname: hostname.to_string(),
      port,
      path: "/p?q=1".to_string(),
      headers: HeaderMap::new(),
      timeout: None,
    }
  }

  #[test]
  fn host_is_filled_when_missing() {
    let req = outbound("backend", 8080).into_request(empty()).unwrap();
    assert_eq!(req.headers()["host"], "backend:8080");
    assert_eq!(req.uri(), "/p?q=1");
    assert_eq!(req.version(), Version::HTTP_11);

    let req = outbound("::1", 80).into_request(empty()).unwrap();
    assert_eq!(req.headers()["host"], "[::1]");
  }

  #[test]
  fn host_is_kept_when_present() {
    let mut out = outbound("backend", 8080);
    out.headers.insert(header::HOST, HeaderValue::from_static("example.com"));
    let req = out.into_request(empty()).unwrap();
    assert_eq!(req.headers()["host"], "example.com");
  }

  #[test]
  fn authority_brackets_ipv6() {
    assert_eq!(outbound("::1", 9000).authority(), "[::1]:9000");
    assert_eq!(outbound("10.0.0.2", 9000).authority(), "10.0.0.2:9000");
  }
}
