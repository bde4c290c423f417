//! A stand-in subscription for operators that must answer the downstream
//! before their own upstream exists.

use std::sync::{
  atomic::{AtomicBool, AtomicU64, Ordering},
  Arc, OnceLock,
};

use crate::{demand, hooks, subscription::Subscription, Error};

/// Buffers `request` and `cancel` until the real upstream subscription
/// arrives, then replays them exactly once.
///
/// The requested units live in a pending counter that is handed over with a
/// single `swap(0)`: whichever side (the `set`, or a racing `request` that
/// noticed the slot fill) wins the swap owns those units and forwards them,
/// so no unit is forwarded twice or lost.
pub struct DeferredSubscription {
  upstream: OnceLock<Arc<dyn Subscription>>,
  pending: AtomicU64,
  cancelled: AtomicBool,
}

impl Default for DeferredSubscription {
  fn default() -> Self { Self::new() }
}

impl DeferredSubscription {
  pub fn new() -> Self {
    DeferredSubscription {
      upstream: OnceLock::new(),
      pending: AtomicU64::new(0),
      cancelled: AtomicBool::new(false),
    }
  }

  /// Install the real upstream. One-shot: a second `set`, or a `set` after
  /// `cancel`, cancels the newcomer and returns `false`. On success any
  /// buffered demand is forwarded.
  pub fn set(&self, sub: Arc<dyn Subscription>) -> bool {
    if self.cancelled.load(Ordering::Acquire) {
      sub.cancel();
      return false;
    }
    if self.upstream.set(sub.clone()).is_err() {
      sub.cancel();
      return false;
    }
    let pending = self.pending.swap(0, Ordering::AcqRel);
    if pending > 0 {
      sub.request(pending);
    }
    // Close the race against a concurrent cancel that missed the slot.
    if self.cancelled.load(Ordering::Acquire) {
      sub.cancel();
    }
    true
  }

  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

impl Subscription for DeferredSubscription {
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      hooks::on_error_dropped(Error::InvalidRequest);
      return;
    }
    if let Some(s) = self.upstream.get() {
      s.request(n);
      return;
    }
    demand::add_cap(&self.pending, n);
    // The slot may have filled while we were buffering; whoever swaps the
    // pending counter to zero owns the buffered units.
    if let Some(s) = self.upstream.get() {
      let pending = self.pending.swap(0, Ordering::AcqRel);
      if pending > 0 {
        s.request(pending);
      }
    }
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      if let Some(s) = self.upstream.get() {
        s.cancel();
      }
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  #[derive(Default)]
  struct CountingSub {
    requested: AtomicU64,
    cancels: AtomicUsize,
  }

  impl Subscription for CountingSub {
    fn request(&self, n: u64) { self.requested.fetch_add(n, Ordering::SeqCst); }

    fn cancel(&self) { self.cancels.fetch_add(1, Ordering::SeqCst); }
  }

  #[test]
  fn buffered_demand_replays_on_set() {
    let d = DeferredSubscription::new();
    d.request(3);
    d.request(4);
    let sub = Arc::new(CountingSub::default());
    assert!(d.set(sub.clone()));
    assert_eq!(sub.requested.load(Ordering::SeqCst), 7);
  }

  #[test]
  fn demand_after_set_is_forwarded_directly() {
    let d = DeferredSubscription::new();
    let sub = Arc::new(CountingSub::default());
    assert!(d.set(sub.clone()));
    d.request(5);
    assert_eq!(sub.requested.load(Ordering::SeqCst), 5);
  }

  #[test]
  fn cancel_before_set_cancels_upstream() {
    let d = DeferredSubscription::new();
    d.cancel();
    let sub = Arc::new(CountingSub::default());
    assert!(!d.set(sub.clone()));
    assert_eq!(sub.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(sub.requested.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn second_set_is_rejected() {
    let d = DeferredSubscription::new();
    let first = Arc::new(CountingSub::default());
    let second = Arc::new(CountingSub::default());
    assert!(d.set(first));
    assert!(!d.set(second.clone()));
    assert_eq!(second.cancels.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn zero_request_is_diverted() {
    let cap = crate::testing::capture_dropped();
    let d = DeferredSubscription::new();
    d.request(0);
    let sub = Arc::new(CountingSub::default());
    assert!(d.set(sub.clone()));
    assert_eq!(sub.requested.load(Ordering::SeqCst), 0);
    assert_eq!(cap.errors(), vec![Error::InvalidRequest]);
  }

  #[test]
  fn units_forwarded_exactly_once_under_race() {
    for _ in 0..100 {
      let d = Arc::new(DeferredSubscription::new());
      let sub = Arc::new(CountingSub::default());
      let setter = {
        let d = d.clone();
        let sub = sub.clone();
        std::thread::spawn(move || {
          d.set(sub);
        })
      };
      let requester = {
        let d = d.clone();
        std::thread::spawn(move || {
          d.request(10);
          d.request(10);
        })
      };
      setter.join().unwrap();
      requester.join().unwrap();
      assert_eq!(sub.requested.load(Ordering::SeqCst), 20);
    }
  }
}
