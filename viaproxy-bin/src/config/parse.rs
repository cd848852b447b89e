use super::toml::ConfigToml;
use crate::constants::*;
use anyhow::{anyhow, ensure};
use clap::Arg;
use http::uri::Authority;
use std::{net::SocketAddr, time::Duration};
use viaproxy_lib::{Options, OptionsBuilder, DEFAULT_UPSTREAM_PORT};

/// Parsed options
pub struct Opts {
  pub config_file_path: String,
}

/// Parse arg values passed from cli
pub fn parse_opts() -> Result<Opts, anyhow::Error> {
  let _ = include_str!("../../Cargo.toml");
  let options = clap::command!().arg(
    Arg::new("config_file")
      .long("config")
      .short('c')
      .value_name("FILE")
      .required(true)
      .help("Configuration file path like ./config.toml"),
  );
  let matches = options.get_matches();

  let config_file_path = matches
    .get_one::<String>("config_file")
    .ok_or(anyhow!("Missing config file path"))?
    .to_owned();

  Ok(Opts { config_file_path })
}

/// Listener side settings
#[derive(Debug, Clone)]
pub struct ListenConfig {
  pub listen_sockets: Vec<SocketAddr>,
  pub tcp_listen_backlog: u32,
  pub max_clients: usize,
}

pub fn build_settings(config: &ConfigToml) -> Result<(ListenConfig, Options), anyhow::Error> {
  ///////////////////////////////////
  // listener
  let listen_port = config.listen_port.ok_or(anyhow!("Missing listen_port"))?;
  ensure!(listen_port > 0, "listen_port must be non-zero");

  let mut listen_addresses: Vec<&str> = LISTEN_ADDRESSES_V4.to_vec();
  if config.listen_ipv6.unwrap_or(false) {
    listen_addresses.extend(LISTEN_ADDRESSES_V6.iter());
  }
  let listen_sockets = listen_addresses
    .iter()
    .map(|addr| format!("{addr}:{listen_port}").parse::<SocketAddr>())
    .collect::<Result<Vec<_>, _>>()?;

  let listen_config = ListenConfig {
    listen_sockets,
    tcp_listen_backlog: config.tcp_listen_backlog.unwrap_or(TCP_LISTEN_BACKLOG),
    max_clients: config.max_clients.unwrap_or(MAX_CLIENTS),
  };

  ///////////////////////////////////
  // forwarding options
  let upstream = config.upstream.as_deref().ok_or(anyhow!("Missing upstream"))?;
  let authority = upstream
    .parse::<Authority>()
    .map_err(|e| anyhow!("Invalid upstream {upstream}: {e}"))?;
  let hostname = authority.host().trim_start_matches('[').trim_end_matches(']');
  let port = authority.port_u16().unwrap_or(DEFAULT_UPSTREAM_PORT);

  let mut builder = OptionsBuilder::default();
  builder.hostname(hostname).port(port);
  if let Some(timeout) = non_zero_secs(config.timeout_sec) {
    builder.timeout(timeout);
  }
  if let Some(proxy_timeout) = non_zero_secs(config.proxy_timeout_sec) {
    builder.proxy_timeout(proxy_timeout);
  }
  if let Some(name) = config.proxy_name.as_ref() {
    ensure!(!name.trim().is_empty(), "proxy_name must not be blank");
    builder.proxy_name(name.as_str());
  }
  let options = builder.build()?;

  Ok((listen_config, options))
}

fn non_zero_secs(secs: Option<u64>) -> Option<Duration> {
  secs.filter(|s| *s > 0).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(upstream: &str) -> ConfigToml {
    ConfigToml {
      listen_port: Some(8080),
      upstream: Some(upstream.to_string()),
      timeout_sec: Some(0),
      proxy_timeout_sec: Some(15),
      ..Default::default()
    }
  }

  #[test]
  fn default_upstream_port() {
    let (listen, options) = build_settings(&config("backend.local")).unwrap();
    assert_eq!(options.hostname, "backend.local");
    assert_eq!(options.port, 80);
    assert_eq!(options.timeout, None);
    assert_eq!(options.proxy_timeout, Some(Duration::from_secs(15)));
    assert_eq!(listen.listen_sockets, vec!["0.0.0.0:8080".parse::<SocketAddr>().unwrap()]);
    assert_eq!(listen.max_clients, MAX_CLIENTS);
  }

  #[test]
  fn bracketed_ipv6_upstream() {
    let (_, options) = build_settings(&config("[::1]:3000")).unwrap();
    assert_eq!(options.hostname, "::1");
    assert_eq!(options.port, 3000);
  }

  #[test]
  fn missing_upstream() {
    let mut c = config("x");
    c.upstream = None;
    assert!(build_settings(&c).is_err());
  }
}
