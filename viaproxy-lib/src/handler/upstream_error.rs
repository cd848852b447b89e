use super::pool::Recycle;
use crate::{error::*, forwarder::AbortHandle, log::*};
use http::StatusCode;

/// Verdict of the upstream error classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classified {
  /// hand the error to the client error reporter, with an explicit status if the mapping gave one
  Report(Option<StatusCode>),
  /// nothing to report
  Ignore,
}

/// Maps upstream and transport failures to client statuses, and owns aborting the outbound request
#[derive(Debug, Default)]
pub(crate) struct UpstreamErrorClassifier {
  has_error: bool,
  abort: Option<AbortHandle>,
}

impl UpstreamErrorClassifier {
  pub(crate) fn bind(&mut self, abort: AbortHandle) {
    self.abort = Some(abort);
  }

  pub(crate) fn classify(&mut self, err: &ProxyError) -> Classified {
    if self.has_error {
      return Classified::Ignore;
    }
    self.has_error = true;

    let status = match err.code() {
      Some(ErrorCode::ConnectionRefused) | Some(ErrorCode::NotFound) => Some(StatusCode::SERVICE_UNAVAILABLE),
      Some(ErrorCode::Parse) => Some(StatusCode::BAD_GATEWAY),
      Some(ErrorCode::ConnectionReset) => {
        if self.is_aborted() {
          // our own abort tearing down the connection
          debug!("Suppressed reset after abort: {err}");
          return Classified::Ignore;
        }
        Some(StatusCode::BAD_GATEWAY)
      }
      None => None,
    };

    self.abort();
    Classified::Report(status)
  }

  fn is_aborted(&self) -> bool {
    self.abort.as_ref().is_some_and(|a| a.is_aborted())
  }

  pub(crate) fn abort(&self) {
    if let Some(abort) = &self.abort {
      if abort.abort() {
        debug!("Outbound request aborted");
      }
    }
  }
}

impl Recycle for UpstreamErrorClassifier {
  fn reset(&mut self) {
    // releasing reclaims the upstream side as well
    self.abort();
    self.abort = None;
    self.has_error = false;
  }
  fn is_inert(&self) -> bool {
    !self.has_error && self.abort.is_none()
  }
}
