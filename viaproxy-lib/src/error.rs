use crate::options::OptionsBuilderError;
use http::StatusCode;
use std::error::Error as _;
use thiserror::Error;

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Transport-level failure classes the upstream error classifier matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
  /// upstream actively refused the connection
  ConnectionRefused,
  /// upstream host name could not be resolved
  NotFound,
  /// upstream sent a malformed http message
  Parse,
  /// connection reset or hung up mid-exchange
  ConnectionReset,
}

/// Describes things that can go wrong while forwarding an exchange
#[derive(Debug, Error)]
pub enum ProxyError {
  // inbound request validation errors
  #[error("Bad request: {0}")]
  BadRequest(&'static str),
  #[error("HTTP version not supported: {0:?}")]
  HttpVersionNotSupported(http::Version),
  #[error("Loop detected: {0}")]
  LoopDetected(String),
  #[error("Request timeout")]
  RequestTimeout,

  // outbound transport errors
  #[error("Failed to resolve upstream {0}: {1}")]
  UpstreamNotFound(String, #[source] std::io::Error),
  #[error("Failed to connect upstream {0}: {1}")]
  UpstreamConnect(String, #[source] std::io::Error),
  #[error("Gateway timeout")]
  GatewayTimeout,
  #[error("Socket hang up")]
  SocketHangUp,
  #[error("Upstream switched protocols without an upgrade request")]
  UnexpectedUpgrade,
  #[error("hyper error: {0}")]
  Hyper(#[from] hyper::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  // message construction errors
  #[error("Invalid header: {0}")]
  InvalidHeader(String),
  #[error("Failed to build outbound request: {0}")]
  FailedToBuildRequest(#[from] http::Error),
  #[error("Failed to build options: {0}")]
  FailedToBuildOptions(#[from] OptionsBuilderError),

  // downstream errors
  #[error("Downstream closed")]
  DownstreamClosed,
  #[error("Response body write aborted")]
  BodyWriteAborted,
}

impl ProxyError {
  /// Status code written to the client when this error is reported without an explicit one
  pub fn status(&self) -> StatusCode {
    match self {
      ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ProxyError::HttpVersionNotSupported(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
      ProxyError::LoopDetected(_) => StatusCode::LOOP_DETECTED,
      ProxyError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
      ProxyError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
      ProxyError::SocketHangUp => StatusCode::BAD_GATEWAY,
      ProxyError::UnexpectedUpgrade => StatusCode::BAD_GATEWAY,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Transport-level failure class, if any
  pub fn code(&self) -> Option<ErrorCode> {
    match self {
      ProxyError::UpstreamNotFound(..) => Some(ErrorCode::NotFound),
      ProxyError::UpstreamConnect(_, e) | ProxyError::Io(e) => io_error_code(e),
      ProxyError::SocketHangUp => Some(ErrorCode::ConnectionReset),
      ProxyError::Hyper(e) => hyper_error_code(e),
      _ => None,
    }
  }
}

fn io_error_code(e: &std::io::Error) -> Option<ErrorCode> {
  use std::io::ErrorKind;
  match e.kind() {
    ErrorKind::ConnectionRefused => Some(ErrorCode::ConnectionRefused),
    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
      Some(ErrorCode::ConnectionReset)
    }
    _ => None,
  }
}

fn hyper_error_code(e: &hyper::Error) -> Option<ErrorCode> {
  if e.is_parse() || e.is_parse_status() {
    return Some(ErrorCode::Parse);
  }
  if e.is_incomplete_message() || e.is_canceled() || e.is_closed() {
    return Some(ErrorCode::ConnectionReset);
  }
  // walk the source chain down to the underlying io error
  let mut source = e.source();
  while let Some(inner) = source {
    if let Some(io) = inner.downcast_ref::<std::io::Error>() {
      return io_error_code(io);
    }
    source = inner.source();
  }
  None
}
