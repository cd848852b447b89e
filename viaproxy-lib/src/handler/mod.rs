mod client_error;
mod dispatcher;
mod lifecycle;
mod pool;
mod response;
mod upgrade;
mod upstream_error;

use crate::error::*;
use std::{future::Future, time::Duration};

pub use dispatcher::{HttpProxy, HttpProxyBuilder, HttpProxyBuilderError, PoolStats};

/// Run `fut` under the outbound idle timeout, answered with 504
pub(crate) async fn within_outbound<T>(limit: Option<Duration>, fut: impl Future<Output = ProxyResult<T>>) -> ProxyResult<T> {
  match limit {
    Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| ProxyError::GatewayTimeout)?,
    None => fut.await,
  }
}

/// Run `fut` under the inbound idle timeout, answered with 408
pub(crate) async fn within_inbound<T>(limit: Option<Duration>, fut: impl Future<Output = ProxyResult<T>>) -> ProxyResult<T> {
  match limit {
    Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| ProxyError::RequestTimeout)?,
    None => fut.await,
  }
}
