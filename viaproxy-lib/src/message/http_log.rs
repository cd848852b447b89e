use super::canonical_address::ToCanonical;
use crate::{inbound::InboundHead, log::*};
use http::header;

/// Struct to log one finished exchange
#[derive(Debug, Clone)]
pub struct HttpMessageLog {
  pub client_addr: String,
  pub method: String,
  pub host: String,
  pub p_and_q: String,
  pub version: http::Version,
  pub ua: String,
  pub status: String,
  pub upstream: String,
  pub upgrade: bool,
}

impl From<&InboundHead> for HttpMessageLog {
  fn from(head: &InboundHead) -> Self {
    let req = &head.parts;
    let header_mapper = |v: header::HeaderName| {
      req
        .headers
        .get(v)
        .map_or_else(|| "", |s| s.to_str().unwrap_or(""))
        .to_string()
    };
    let host = match header_mapper(header::HOST) {
      h if h.is_empty() => req.uri.host().unwrap_or("").to_string(),
      h => h,
    };
    Self {
      client_addr: head.conn.remote_addr.to_canonical().to_string(),
      method: req.method.to_string(),
      host,
      p_and_q: req.uri.path_and_query().map_or_else(|| "", |v| v.as_str()).to_string(),
      version: req.version,
      ua: header_mapper(header::USER_AGENT),
      status: "".to_string(),
      upstream: "".to_string(),
      upgrade: false,
    }
  }
}

impl std::fmt::Display for HttpMessageLog {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{} <- {} -- {} {} {:?} -- {}{} -- {} \"{}\"",
      self.host,
      self.client_addr,
      self.method,
      self.p_and_q,
      self.version,
      if self.status.is_empty() { "-" } else { self.status.as_str() },
      if self.upgrade { " (tunnel)" } else { "" },
      self.upstream,
      self.ua,
    )
  }
}

impl HttpMessageLog {
  pub fn status_code(&mut self, status_code: &http::StatusCode) -> &mut Self {
    self.status = status_code.as_u16().to_string();
    self
  }
  pub fn upstream(&mut self, authority: &str) -> &mut Self {
    self.upstream = authority.to_string();
    self
  }
  pub fn tunnel(&mut self) -> &mut Self {
    self.upgrade = true;
    self
  }

  pub fn output(&self) {
    info!(
      name: crate::constants::log_event_names::ACCESS_LOG,
      "{}", self
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::inbound::ConnInfo;

  #[test]
  fn log_line_uses_canonical_client() {
    let (parts, _) = http::Request::get("/a?b=1")
      .header("host", "example.com")
      .header("user-agent", "curl")
      .body(())
      .unwrap()
      .into_parts();
    let head = InboundHead {
      parts,
      conn: ConnInfo {
        local_addr: "127.0.0.1:80".parse().unwrap(),
        remote_addr: "[::ffff:192.0.2.1]:5000".parse().unwrap(),
        tls: false,
      },
    };
    let mut log = HttpMessageLog::from(&head);
    log.status_code(&http::StatusCode::OK).upstream("up:8080");
    let line = log.to_string();
    assert!(line.starts_with("example.com <- 192.0.2.1:5000 -- GET /a?b=1"));
    assert!(line.contains("-- 200 -- up:8080 \"curl\""));
  }
}
