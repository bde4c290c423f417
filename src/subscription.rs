//! The demand channel between a sink and its source.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc, OnceLock,
};

use crate::fusion::FusedQueue;

/// Handle a source gives its sink for pulling items and for walking away.
///
/// `request` and `cancel` may be called from any thread, concurrently with
/// the source delivering items.
pub trait Subscription: Send + Sync {
  /// Ask the source for `n` more items. `n == 0` is a protocol violation;
  /// operators route it to [`hooks::on_error_dropped`](crate::hooks).
  fn request(&self, n: u64);

  /// Stop the stream. Idempotent; after this the source issues no further
  /// upstream requests and at most one already-in-flight item arrives.
  fn cancel(&self);
}

/// What a sink receives in `on_subscribe`: the subscription, plus the fused
/// queue when the source supports the fast path.
///
/// Carrying the optional [`FusedQueue`] alongside the subscription is how an
/// operator discovers fusion capability; a source that cannot fuse simply
/// leaves it out.
pub struct Upstream<T> {
  sub: Arc<dyn Subscription>,
  queue: Option<Arc<dyn FusedQueue<T>>>,
}

impl<T> Upstream<T> {
  /// A plain, non-fuseable upstream.
  pub fn new(sub: Arc<dyn Subscription>) -> Self { Upstream { sub, queue: None } }

  /// An upstream offering queue fusion.
  pub fn with_queue(sub: Arc<dyn Subscription>, queue: Arc<dyn FusedQueue<T>>) -> Self {
    Upstream { sub, queue: Some(queue) }
  }

  #[inline]
  pub fn request(&self, n: u64) { self.sub.request(n) }

  #[inline]
  pub fn cancel(&self) { self.sub.cancel() }

  /// The bare subscription, for storing in an operator's upstream slot.
  pub fn subscription(&self) -> Arc<dyn Subscription> { self.sub.clone() }

  /// The fused queue, if the source offered one.
  pub fn fused_queue(&self) -> Option<Arc<dyn FusedQueue<T>>> { self.queue.clone() }
}

impl<T> Clone for Upstream<T> {
  fn clone(&self) -> Self { Upstream { sub: self.sub.clone(), queue: self.queue.clone() } }
}

/// One-shot upstream slot with a cancelled latch.
///
/// `set` accepts exactly one subscription; a latecomer (duplicate
/// `on_subscribe`, or arrival after `cancel`) is cancelled on the spot. This
/// is the once-only latching every operator's upstream edge needs.
pub struct OnceSub {
  slot: OnceLock<Arc<dyn Subscription>>,
  cancelled: AtomicBool,
}

impl Default for OnceSub {
  fn default() -> Self { Self::new() }
}

impl OnceSub {
  pub fn new() -> Self { OnceSub { slot: OnceLock::new(), cancelled: AtomicBool::new(false) } }

  /// Store the upstream subscription. Returns `false` (cancelling the
  /// newcomer) if a subscription is already latched or the slot was
  /// cancelled first.
  pub fn set(&self, sub: Arc<dyn Subscription>) -> bool {
    if self.cancelled.load(Ordering::Acquire) {
      sub.cancel();
      return false;
    }
    if self.slot.set(sub.clone()).is_err() {
      sub.cancel();
      return false;
    }
    // A cancel may have slipped between the flag check and the store.
    if self.cancelled.load(Ordering::Acquire) {
      sub.cancel();
    }
    true
  }

  /// Forward demand to the latched upstream, if any.
  pub fn request(&self, n: u64) {
    if let Some(s) = self.slot.get() {
      s.request(n);
    }
  }

  /// Latch cancelled and cancel the occupant. Idempotent.
  pub fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      if let Some(s) = self.slot.get() {
        s.cancel();
      }
    }
  }

  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  #[derive(Default)]
  struct CountingSub {
    requested: AtomicUsize,
    cancels: AtomicUsize,
  }

  impl Subscription for CountingSub {
    fn request(&self, n: u64) { self.requested.fetch_add(n as usize, Ordering::SeqCst); }

    fn cancel(&self) { self.cancels.fetch_add(1, Ordering::SeqCst); }
  }

  #[test]
  fn second_set_cancels_newcomer() {
    let once = OnceSub::new();
    let first = Arc::new(CountingSub::default());
    let second = Arc::new(CountingSub::default());
    assert!(once.set(first.clone()));
    assert!(!once.set(second.clone()));
    assert_eq!(second.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(first.cancels.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn set_after_cancel_cancels_newcomer() {
    let once = OnceSub::new();
    once.cancel();
    let sub = Arc::new(CountingSub::default());
    assert!(!once.set(sub.clone()));
    assert_eq!(sub.cancels.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn cancel_is_idempotent() {
    let once = OnceSub::new();
    let sub = Arc::new(CountingSub::default());
    assert!(once.set(sub.clone()));
    once.cancel();
    once.cancel();
    assert_eq!(sub.cancels.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn request_reaches_occupant() {
    let once = OnceSub::new();
    let sub = Arc::new(CountingSub::default());
    once.request(3); // no occupant yet: silently ignored
    assert!(once.set(sub.clone()));
    once.request(5);
    assert_eq!(sub.requested.load(Ordering::SeqCst), 5);
  }
}
