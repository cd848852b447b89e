use anyhow::anyhow;
use serde::Deserialize;
use std::fs;

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct ConfigToml {
  pub listen_port: Option<u16>,
  pub listen_ipv6: Option<bool>,
  pub tcp_listen_backlog: Option<u32>,
  pub max_clients: Option<usize>,
  /// `host[:port]` of the single upstream
  pub upstream: Option<String>,
  pub proxy_name: Option<String>,
  /// inbound idle timeout in seconds, 0 disables it
  pub timeout_sec: Option<u64>,
  /// outbound idle timeout in seconds, 0 disables it
  pub proxy_timeout_sec: Option<u64>,
}

impl ConfigToml {
  pub fn new(config_file: &str) -> Result<Self, anyhow::Error> {
    let config_str = fs::read_to_string(config_file)?;
    Self::parse(&config_str)
  }

  pub fn parse(config_str: &str) -> Result<Self, anyhow::Error> {
    toml::from_str(config_str).map_err(|e| anyhow!(e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_full_config() {
    let config = ConfigToml::parse(
      r#"
listen_port = 8080
listen_ipv6 = true
max_clients = 64
upstream = "127.0.0.1:3000"
proxy_name = "edge-1"
timeout_sec = 30
proxy_timeout_sec = 0
"#,
    )
    .unwrap();
    assert_eq!(config.listen_port, Some(8080));
    assert_eq!(config.listen_ipv6, Some(true));
    assert_eq!(config.upstream.as_deref(), Some("127.0.0.1:3000"));
    assert_eq!(config.proxy_timeout_sec, Some(0));
    assert_eq!(config.tcp_listen_backlog, None);
  }

  #[test]
  fn reject_wrong_types() {
    assert!(ConfigToml::parse("listen_port = \"eighty\"").is_err());
  }
}
