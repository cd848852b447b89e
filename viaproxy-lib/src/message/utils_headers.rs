use super::canonical_address::ToCanonical;
use crate::{constants::WEBSOCKET, error::*, inbound::ConnInfo, log::*};
use bytes::BufMut;
use http::{header, request, HeaderMap, HeaderName, HeaderValue};

/// Header name of the forwarding chain
pub(crate) const FORWARDED: &str = "forwarded";

/// Hop header values which are removed at proxy in both directions
const HOP_HEADERS: &[&str] = &[
  "connection",
  "keep-alive",
  "transfer-encoding",
  "te",
  "upgrade",
  "proxy-authorization",
  "proxy-connection",
  "http2-settings",
];

/// Trimmed, lower-cased form used for token comparisons
pub(crate) fn sanitize(value: &str) -> String {
  value.trim().to_ascii_lowercase()
}

/// Remove headers listed in `Connection`, except when the value is `close`
pub(crate) fn remove_connection_header(headers: &mut HeaderMap) {
  let listed = headers
    .get_all(header::CONNECTION)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .filter(|v| sanitize(v) != "close")
    .flat_map(|v| v.split(','))
    .map(sanitize)
    .filter(|m| !m.is_empty())
    .collect::<Vec<_>>();
  for name in listed {
    headers.remove(name.as_str());
  }
}

/// Remove hop headers
pub(crate) fn remove_hop_header(headers: &mut HeaderMap) {
  HOP_HEADERS.iter().for_each(|key| {
    headers.remove(*key);
  });
}

/// Connection-listed headers first, then the fixed hop list
pub(crate) fn strip_hop_headers(headers: &mut HeaderMap) {
  remove_connection_header(headers);
  remove_hop_header(headers);
}

/// True if `Upgrade` is present and equals `websocket`, ignoring case
pub(crate) fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
  headers
    .get(header::UPGRADE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.trim().eq_ignore_ascii_case(WEBSOCKET))
}

/// True if any `Via` entry ends with our proxy name
pub(crate) fn loop_detected(headers: &HeaderMap, proxy_name: &str) -> bool {
  let name = proxy_name.to_ascii_lowercase();
  headers
    .get_all(header::VIA)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(','))
    .any(|entry| sanitize(entry).ends_with(&name))
}

/// Append header entry with comma according to [RFC9110](https://datatracker.ietf.org/doc/html/rfc9110)
pub(crate) fn append_header_entry_with_comma(headers: &mut HeaderMap, key: HeaderName, value: &str) -> ProxyResult<()> {
  let invalid = |_| ProxyError::InvalidHeader(format!("{key}: {value}"));
  match headers.entry(key.clone()) {
    header::Entry::Vacant(entry) => {
      entry.insert(HeaderValue::from_str(value).map_err(invalid)?);
    }
    header::Entry::Occupied(mut entry) => {
      let mut new_value = Vec::<u8>::with_capacity(entry.get().as_bytes().len() + 2 + value.len());
      new_value.put_slice(entry.get().as_bytes());
      new_value.put_slice(b", ");
      new_value.put_slice(value.as_bytes());
      entry.insert(HeaderValue::from_bytes(&new_value).map_err(invalid)?);
    }
  }
  Ok(())
}

/// Collect every `for=<token>` occurrence, case-insensitive.
/// This is a loose scan, not a full RFC 7239 parser: quoted tokens keep their quotes.
pub(crate) fn extract_forwarded_for(value: &str) -> Vec<&str> {
  let bytes = value.as_bytes();
  let mut found = Vec::new();
  let mut pos = 0;
  while pos + 4 <= bytes.len() {
    if !bytes[pos..pos + 4].eq_ignore_ascii_case(b"for=") {
      pos += 1;
      continue;
    }
    let mut start = pos + 4;
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
      start += 1;
    }
    let mut end = start;
    while end < bytes.len() && !bytes[end].is_ascii_whitespace() && bytes[end] != b';' && bytes[end] != b',' {
      end += 1;
    }
    if end > start {
      found.push(&value[start..end]);
    }
    pos = end.max(pos + 4);
  }
  found
}

/// Build the outgoing `Forwarded` value: our hop first, then the previous chain
pub(crate) fn forwarded_value(parts: &request::Parts, conn: &ConnInfo) -> String {
  let mut value = format!(
    "by={}; for={}",
    conn.local_addr.to_canonical().ip(),
    conn.remote_addr.to_canonical().ip()
  );

  for prev in parts.headers.get_all(FORWARDED).iter().filter_map(|v| v.to_str().ok()) {
    for token in extract_forwarded_for(prev) {
      value.push_str("; for=");
      value.push_str(token);
    }
  }

  let host = parts
    .uri
    .authority()
    .map(|a| a.as_str())
    .or_else(|| parts.headers.get(header::HOST).and_then(|v| v.to_str().ok()));
  if let Some(host) = host {
    value.push_str("; host=");
    value.push_str(host);
  }

  value.push_str(if conn.tls { "; proto=https" } else { "; proto=http" });
  value
}

/// Derive outbound headers from the inbound request head
pub(crate) fn build_outbound_headers(parts: &request::Parts, conn: &ConnInfo) -> ProxyResult<HeaderMap> {
  let mut headers = parts.headers.clone();
  strip_hop_headers(&mut headers);

  if parts.headers.contains_key(header::UPGRADE) {
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static(WEBSOCKET));
  }

  let forwarded = forwarded_value(parts, conn);
  let forwarded = HeaderValue::from_str(&forwarded).map_err(|_| ProxyError::InvalidHeader(format!("forwarded: {forwarded}")))?;
  headers.insert(FORWARDED, forwarded);

  trace!("Outbound headers: {:?}", headers);
  Ok(headers)
}
