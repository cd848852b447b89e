use std::{
  ops::{Deref, DerefMut},
  sync::{Arc, Mutex, MutexGuard},
};

/// Handler state that can be cleared and reused across exchanges
pub(crate) trait Recycle: Default + Send {
  /// Drop every exchange-bound field
  fn reset(&mut self);
  /// True if no field is bound to an exchange
  fn is_inert(&self) -> bool;
}

/// Bounded free-list of inert handler instances
pub(crate) struct Pool<T> {
  free: Mutex<Vec<T>>,
  capacity: usize,
}

impl<T: Recycle> Pool<T> {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      free: Mutex::new(Vec::new()),
      capacity,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Vec<T>> {
    // entries are inert whenever the lock is released, so a poisoned list is still usable
    self.free.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Take an inert instance, or a fresh one if the list is empty
  pub(crate) fn acquire(self: &Arc<Self>) -> Pooled<T> {
    let item = self.lock().pop().unwrap_or_default();
    debug_assert!(item.is_inert(), "pooled handler handed out while still bound");
    Pooled {
      item,
      pool: self.clone(),
    }
  }

  fn put_back(&self, mut item: T) {
    item.reset();
    debug_assert!(item.is_inert(), "handler returned to pool while still bound");
    let mut free = self.lock();
    if free.len() < self.capacity {
      free.push(item);
    }
  }

  /// Number of instances waiting in the pool
  pub(crate) fn idle(&self) -> usize {
    self.lock().len()
  }

  /// Number of pooled instances that still hold exchange state. Always zero unless an invariant broke.
  pub(crate) fn bound(&self) -> usize {
    self.lock().iter().filter(|item| !item.is_inert()).count()
  }
}

/// Handler bound to one live exchange. Dropping it releases the handler back to its pool.
pub(crate) struct Pooled<T: Recycle> {
  item: T,
  pool: Arc<Pool<T>>,
}

impl<T: Recycle> Pooled<T> {
  /// Explicit release, same as drop
  pub(crate) fn release(self) {
    drop(self)
  }
}

impl<T: Recycle> Deref for Pooled<T> {
  type Target = T;
  fn deref(&self) -> &T {
    &self.item
  }
}

impl<T: Recycle> DerefMut for Pooled<T> {
  fn deref_mut(&mut self) -> &mut T {
    &mut self.item
  }
}

impl<T: Recycle> Drop for Pooled<T> {
  fn drop(&mut self) {
    let item = std::mem::take(&mut self.item);
    self.pool.put_back(item);
  }
}
