use super::pool::Recycle;

/// Kinds of per-exchange handlers registered for release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerKind {
  ClientError,
  UpstreamError,
  Response,
  Upgrade,
}

/// Tracks which handlers an exchange has bound and hands out their release order once
#[derive(Debug, Default)]
pub(crate) struct LifecycleTracker {
  registered: Vec<HandlerKind>,
  fired: bool,
}

impl LifecycleTracker {
  pub(crate) fn register(&mut self, kind: HandlerKind) {
    debug_assert!(!self.fired, "handler registered after release");
    debug_assert!(!self.registered.contains(&kind), "handler registered twice");
    self.registered.push(kind);
  }

  /// Registration order on the first call, `None` afterwards
  pub(crate) fn fire(&mut self) -> Option<Vec<HandlerKind>> {
    if self.fired {
      return None;
    }
    self.fired = true;
    Some(std::mem::take(&mut self.registered))
  }
}

impl Recycle for LifecycleTracker {
  fn reset(&mut self) {
    self.registered.clear();
    self.fired = false;
  }
  fn is_inert(&self) -> bool {
    self.registered.is_empty() && !self.fired
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fires_once_in_registration_order() {
    let mut tracker = LifecycleTracker::default();
    tracker.register(HandlerKind::ClientError);
    tracker.register(HandlerKind::UpstreamError);
    tracker.register(HandlerKind::Response);
    assert_eq!(
      tracker.fire(),
      Some(vec![HandlerKind::ClientError, HandlerKind::UpstreamError, HandlerKind::Response])
    );
    assert_eq!(tracker.fire(), None);
    assert!(!tracker.is_inert());
    tracker.reset();
    assert!(tracker.is_inert());
  }
}
