mod constants;
mod downstream;
mod error;
mod forwarder;
mod handler;
mod hyper_ext;
mod inbound;
mod log;
mod message;
mod options;

pub use crate::{
  constants::{DEFAULT_UPSTREAM_PORT, HANDLER_POOL_CAPACITY},
  downstream::{ClientSocket, Downstream, DownstreamKind, RawSocket, ResponseFuture, ResponseWriter},
  error::{ErrorCode, ProxyError, ProxyResult},
  handler::{HttpProxy, HttpProxyBuilder, HttpProxyBuilderError, PoolStats},
  hyper_ext::{BoxError, RequestBody, ResponseBody, Rewind},
  inbound::{ConnInfo, Inbound, InboundHead},
  message::ToCanonical,
  options::{Callback, OnRequest, OnResponse, Options, OptionsBuilder, OptionsBuilderError, OutboundOptions, ResponseView},
};

pub mod reexports {
  pub use bytes::Bytes;
  pub use http;
}
