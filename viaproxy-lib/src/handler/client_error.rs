use super::pool::Recycle;
use crate::{
  downstream::{Downstream, DownstreamKind},
  error::*,
  inbound::InboundHead,
  log::*,
  options::Callback,
};
use http::StatusCode;

/// Writes the terminal error outcome to the client and runs the completion hook.
/// Only the first report per exchange has any effect.
#[derive(Default)]
pub(crate) struct ClientErrorReporter {
  has_error: bool,
  callback: Option<Callback>,
  /// error kept for the caller when no completion hook was given
  unhandled: Option<ProxyError>,
  /// status written to the client, if one could be
  written: Option<StatusCode>,
}

impl ClientErrorReporter {
  pub(crate) fn bind(&mut self, callback: Option<Callback>) {
    self.callback = callback;
  }

  /// Returns false if an outcome was already reported
  pub(crate) fn report(
    &mut self,
    err: ProxyError,
    status: Option<StatusCode>,
    head: &InboundHead,
    downstream: &mut Option<Downstream>,
    kind: DownstreamKind,
  ) -> bool {
    if self.has_error {
      debug!("Ignoring error after the exchange was already reported: {err}");
      return false;
    }
    self.has_error = true;
    let status = status.unwrap_or_else(|| err.status());

    match downstream.take() {
      Some(Downstream::Response(mut writer)) => {
        if !writer.headers_sent() && !writer.is_closed() {
          let (s, headers) = writer.head_mut();
          *s = status;
          headers.clear();
          match writer.end() {
            Ok(()) => self.written = Some(status),
            Err(e) => {
              debug!("Failed to write error response: {e}");
              writer.destroy();
            }
          }
        } else {
          writer.destroy();
        }
        *downstream = Some(Downstream::Response(writer));
      }
      // no status line on a raw socket, dropping it closes the connection
      Some(Downstream::Socket(socket)) => drop(socket),
      None => (),
    }

    match self.callback.take() {
      Some(callback) => {
        debug!("Exchange failed with {status}: {err}");
        callback(err, head, kind);
      }
      None => {
        warn!("Exchange failed with {status}: {err}");
        self.unhandled = Some(err);
      }
    }
    true
  }

  /// Shortcut for an expired inbound timeout
  pub(crate) fn request_timeout(&mut self, head: &InboundHead, downstream: &mut Option<Downstream>, kind: DownstreamKind) {
    self.report(
      ProxyError::RequestTimeout,
      Some(StatusCode::REQUEST_TIMEOUT),
      head,
      downstream,
      kind,
    );
  }

  pub(crate) fn take_unhandled(&mut self) -> Option<ProxyError> {
    self.unhandled.take()
  }

  pub(crate) fn written_status(&self) -> Option<StatusCode> {
    self.written
  }
}

impl Recycle for ClientErrorReporter {
  fn reset(&mut self) {
    self.has_error = false;
    self.callback = None;
    self.unhandled = None;
    self.written = None;
  }
  fn is_inert(&self) -> bool {
    !self.has_error && self.callback.is_none() && self.unhandled.is_none() && self.written.is_none()
  }
}
