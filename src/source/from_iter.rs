//! Backpressured source over any iterator.

use std::{
  iter::Peekable,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  demand,
  error::Error,
  fusion::{FusedQueue, FusionMode},
  hooks,
  sink::Sink,
  source::Source,
  subscription::{Subscription, Upstream},
};

/// Create a source that emits the iterator's items on demand and completes
/// on exhaustion.
///
/// Offers SYNC fusion: a fused consumer draws items straight through
/// [`FusedQueue::poll`] and never sees `on_next`.
pub fn from_iter<I: IntoIterator>(iter: I) -> IterSource<I> { IterSource(iter) }

pub struct IterSource<I>(I);

impl<I> Source for IterSource<I>
where
  I: IntoIterator,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;

  fn subscribe<S>(self, mut sink: S)
  where
    S: Sink<I::Item> + Send + 'static,
  {
    let sub = Arc::new(IterSub {
      iter: Mutex::new(self.0.into_iter().peekable()),
      sink: Mutex::new(None),
      requested: AtomicU64::new(0),
      wip: AtomicUsize::new(0),
      installed: AtomicBool::new(false),
      stopped: AtomicBool::new(false),
      fused: AtomicBool::new(false),
    });
    // The sink is installed only after on_subscribe returns, so demand
    // requested from inside it accumulates and is flushed by the drain
    // below instead of re-entering the sink.
    sink.on_subscribe(Upstream::with_queue(sub.clone(), sub.clone()));
    *sub.sink.lock() = Some(sink);
    sub.installed.store(true, Ordering::Release);
    sub.drain();
  }
}

struct IterSub<It: Iterator, S> {
  iter: Mutex<Peekable<It>>,
  // None until on_subscribe has been delivered.
  sink: Mutex<Option<S>>,
  requested: AtomicU64,
  wip: AtomicUsize,
  // Set once the sink slot is populated; drains before that would find an
  // empty slot and must leave the demand buffered instead.
  installed: AtomicBool,
  // Set by cancel, by exhaustion, and by a fused consumer's clear.
  stopped: AtomicBool,
  fused: AtomicBool,
}

impl<It, S> IterSub<It, S>
where
  It: Iterator,
  S: Sink<It::Item>,
{
  fn drain(&self) {
    if self.fused.load(Ordering::Acquire) {
      // A fused consumer pulls through `poll`; nothing to push.
      return;
    }
    if !self.installed.load(Ordering::Acquire) {
      return;
    }
    if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
      return;
    }
    let mut missed = 1;
    loop {
      let r = self.requested.load(Ordering::Acquire);
      let mut e = 0u64;
      {
        let mut sink = self.sink.lock();
        let Some(sink) = sink.as_mut() else { return };
        let mut iter = self.iter.lock();
        while e != r {
          if self.stopped.load(Ordering::Acquire) {
            return;
          }
          match iter.next() {
            Some(v) => {
              sink.on_next(v);
              e += 1;
            }
            None => {
              self.stopped.store(true, Ordering::Release);
              sink.on_complete();
              return;
            }
          }
        }
        if e == r && iter.peek().is_none() && !self.stopped.load(Ordering::Acquire) {
          self.stopped.store(true, Ordering::Release);
          sink.on_complete();
          return;
        }
      }
      if e > 0 {
        demand::produced(&self.requested, e);
      }
      let left = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if left == 0 {
        break;
      }
      missed = left;
    }
  }
}

impl<It, S> Subscription for IterSub<It, S>
where
  It: Iterator + Send,
  It::Item: Send,
  S: Sink<It::Item> + Send,
{
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      hooks::on_error_dropped(Error::InvalidRequest);
      return;
    }
    demand::add_cap(&self.requested, n);
    self.drain();
  }

  fn cancel(&self) { self.stopped.store(true, Ordering::Release); }
}

impl<It, S> FusedQueue<It::Item> for IterSub<It, S>
where
  It: Iterator + Send,
  It::Item: Send,
  S: Sink<It::Item> + Send,
{
  fn request_fusion(&self, mask: FusionMode) -> FusionMode {
    if mask.accepts(FusionMode::SYNC) {
      self.fused.store(true, Ordering::Release);
      FusionMode::SYNC
    } else {
      FusionMode::NONE
    }
  }

  fn poll(&self) -> Result<Option<It::Item>, Error> {
    if self.stopped.load(Ordering::Acquire) {
      return Ok(None);
    }
    Ok(self.iter.lock().next())
  }

  fn is_empty(&self) -> bool {
    self.stopped.load(Ordering::Acquire) || self.iter.lock().peek().is_none()
  }

  fn clear(&self) { self.stopped.store(true, Ordering::Release); }
}
