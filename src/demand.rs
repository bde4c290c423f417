//! Demand accounting.
//!
//! Each subscription owes its sink a non-negative number of items. The
//! counter lives in an `AtomicU64`; [`UNBOUNDED`] is a sticky sentinel meaning
//! "no limit": once a counter reaches it, additions are no-ops and per-item
//! decrements are skipped.

use std::sync::atomic::{AtomicU64, Ordering};

/// Demand sentinel for "emit freely".
pub const UNBOUNDED: u64 = u64::MAX;

/// Check a `request(n)` amount. Zero demand is a protocol violation; the
/// caller decides whether to drop or surface it.
#[inline]
pub fn validate(n: u64) -> bool { n != 0 }

/// Add `n` to `requested`, saturating at [`UNBOUNDED`]. Returns the previous
/// value.
pub fn add_cap(requested: &AtomicU64, n: u64) -> u64 {
  let mut curr = requested.load(Ordering::Relaxed);
  loop {
    if curr == UNBOUNDED {
      return UNBOUNDED;
    }
    let next = curr.saturating_add(n);
    match requested.compare_exchange_weak(curr, next, Ordering::AcqRel, Ordering::Acquire) {
      Ok(prev) => return prev,
      Err(actual) => curr = actual,
    }
  }
}

/// Subtract `n` fulfilled items from `requested`, unless the counter sits at
/// the sentinel. Saturates at zero. Returns the previous value.
pub fn produced(requested: &AtomicU64, n: u64) -> u64 {
  let mut curr = requested.load(Ordering::Relaxed);
  loop {
    if curr == UNBOUNDED {
      return UNBOUNDED;
    }
    let next = curr.saturating_sub(n);
    match requested.compare_exchange_weak(curr, next, Ordering::AcqRel, Ordering::Acquire) {
      Ok(prev) => return prev,
      Err(actual) => curr = actual,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn validate_rejects_zero() {
    assert!(!validate(0));
    assert!(validate(1));
    assert!(validate(UNBOUNDED));
  }

  #[test]
  fn add_saturates_at_sentinel() {
    let r = AtomicU64::new(UNBOUNDED - 1);
    add_cap(&r, 10);
    assert_eq!(r.load(Ordering::Relaxed), UNBOUNDED);
    // Sticky: further adds keep the sentinel.
    add_cap(&r, 1);
    assert_eq!(r.load(Ordering::Relaxed), UNBOUNDED);
  }

  #[test]
  fn add_returns_previous() {
    let r = AtomicU64::new(3);
    assert_eq!(add_cap(&r, 4), 3);
    assert_eq!(r.load(Ordering::Relaxed), 7);
  }

  #[test]
  fn produced_skips_sentinel() {
    let r = AtomicU64::new(UNBOUNDED);
    produced(&r, 5);
    assert_eq!(r.load(Ordering::Relaxed), UNBOUNDED);
  }

  #[test]
  fn produced_never_goes_negative() {
    let r = AtomicU64::new(2);
    produced(&r, 5);
    assert_eq!(r.load(Ordering::Relaxed), 0);
  }

  #[test]
  fn concurrent_adds_accumulate() {
    use std::sync::Arc;
    let r = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let r = r.clone();
        std::thread::spawn(move || {
          for _ in 0..1000 {
            add_cap(&r, 1);
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    assert_eq!(r.load(Ordering::Relaxed), 4000);
  }
}
