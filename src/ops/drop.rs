//! Backpressure relief: discard what the downstream has not asked for.

use std::sync::{atomic::AtomicU64, Arc};

use crate::{
  demand::{self, UNBOUNDED},
  error::Error,
  hooks,
  sink::Sink,
  source::Source,
  subscription::{OnceSub, Subscription, Upstream},
};

/// Requests unbounded demand from the upstream and forwards an item only
/// while the downstream has outstanding credit; everything else goes to the
/// `on_drop` callback.
pub struct DropOp<S, F> {
  source: S,
  on_drop: F,
}

impl<S, F> DropOp<S, F> {
  pub(crate) fn new(source: S, on_drop: F) -> Self { DropOp { source, on_drop } }
}

impl<S, F> Source for DropOp<S, F>
where
  S: Source,
  S::Item: Send + 'static,
  F: FnMut(S::Item) -> Result<(), Error> + Send + 'static,
{
  type Item = S::Item;

  fn subscribe<K>(self, sink: K)
  where
    K: Sink<S::Item> + Send + 'static,
  {
    self.source.subscribe(DropSink {
      shared: Arc::new(DropShared { upstream: OnceSub::new(), requested: AtomicU64::new(0) }),
      sink,
      on_drop: self.on_drop,
      done: false,
    });
  }
}

/// The downstream-facing subscription: a demand counter in front of the
/// latched upstream.
struct DropShared {
  upstream: OnceSub,
  requested: AtomicU64,
}

impl Subscription for DropShared {
  fn request(&self, n: u64) {
    if demand::validate(n) {
      demand::add_cap(&self.requested, n);
    } else {
      hooks::on_error_dropped(Error::InvalidRequest);
    }
  }

  fn cancel(&self) { self.upstream.cancel(); }
}

struct DropSink<K, F> {
  shared: Arc<DropShared>,
  sink: K,
  on_drop: F,
  // Terminal signals are never concurrent, so a plain flag suffices.
  done: bool,
}

impl<T, K, F> Sink<T> for DropSink<K, F>
where
  T: Send + 'static,
  K: Sink<T>,
  F: FnMut(T) -> Result<(), Error>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    if !self.shared.upstream.set(upstream.subscription()) {
      return;
    }
    self.sink.on_subscribe(Upstream::new(self.shared.clone()));
    upstream.request(UNBOUNDED);
  }

  fn on_next(&mut self, item: T) {
    if self.done {
      // Past the terminal the callback still gets a look, but its failure
      // is no longer allowed to become a live signal.
      if let Err(err) = (self.on_drop)(item) {
        hooks::on_error_dropped(err);
      }
      return;
    }

    if self.shared.requested.load(std::sync::atomic::Ordering::Acquire) != 0 {
      self.sink.on_next(item);
      demand::produced(&self.shared.requested, 1);
    } else if let Err(err) = (self.on_drop)(item) {
      self.shared.upstream.cancel();
      self.on_error(err);
    }
  }

  fn on_error(&mut self, err: Error) {
    if self.done {
      hooks::on_error_dropped(err);
      return;
    }
    self.done = true;
    self.sink.on_error(err);
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.sink.on_complete();
  }
}
