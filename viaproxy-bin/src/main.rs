#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod constants;
mod count;
mod listener;
mod log;

use crate::{
  config::{build_settings, parse_opts, ConfigToml},
  count::ConnectionCount,
  listener::Listener,
  log::*,
};
use tokio::task::JoinSet;
use viaproxy_lib::HttpProxyBuilder;

fn main() {
  init_logger();

  let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
  runtime_builder.enable_all();
  runtime_builder.thread_name("viaproxy");
  let runtime = match runtime_builder.build() {
    Ok(runtime) => runtime,
    Err(e) => {
      error!("Failed to build tokio runtime: {e}");
      std::process::exit(1);
    }
  };

  runtime.block_on(async {
    let Ok(parsed_opts) = parse_opts() else {
      error!("Invalid command line options");
      std::process::exit(1);
    };

    if let Err(e) = viaproxy_service(&parsed_opts.config_file_path, runtime.handle().clone()).await {
      error!("viaproxy service exited: {e}");
      std::process::exit(1);
    }
  });
}

async fn viaproxy_service(config_file_path: &str, runtime_handle: tokio::runtime::Handle) -> Result<(), anyhow::Error> {
  info!("Start viaproxy service");
  let config_toml = ConfigToml::new(config_file_path).map_err(|e| anyhow::anyhow!("Invalid toml file: {e}"))?;
  let (listen_config, options) = build_settings(&config_toml).map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
  info!("Forwarding to {}:{}", options.hostname, options.port);

  let proxy = HttpProxyBuilder::default().runtime_handle(runtime_handle.clone()).build()?;
  let connection_count = ConnectionCount::default();

  let mut listeners = JoinSet::new();
  for listening_on in listen_config.listen_sockets.iter() {
    let listener = Listener::new(
      *listening_on,
      &listen_config,
      connection_count.clone(),
      proxy.clone(),
      options.clone(),
    );
    listeners.spawn_on(async move { listener.start().await }, &runtime_handle);
  }

  // Any listener going down takes the service with it
  match listeners.join_next().await {
    Some(Ok(Err(e))) => Err(e.into()),
    Some(Err(e)) => Err(e.into()),
    _ => Err(anyhow::anyhow!("listener exited")),
  }
}
