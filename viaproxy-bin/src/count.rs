use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

/// Number of client connections being served, shared by every listener
#[derive(Debug, Clone, Default)]
pub struct ConnectionCount(Arc<AtomicUsize>);

/// One admitted client connection. The count goes back down when the slot is dropped.
#[derive(Debug)]
pub struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionCount {
  pub fn current(&self) -> usize {
    self.0.load(Ordering::Relaxed)
  }

  /// Takes a slot unless `max` connections are already being served.
  /// The limit check and the increment are one atomic step.
  pub fn try_acquire(&self, max: usize) -> Option<ConnectionSlot> {
    self
      .0
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
      .ok()
      .map(|_| ConnectionSlot(self.0.clone()))
  }
}

impl Drop for ConnectionSlot {
  fn drop(&mut self) {
    // saturating, a slot never takes the count below zero
    let _ = self
      .0
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
  }
}
