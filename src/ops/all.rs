//! Does every item match a predicate? One boolean answer, short-circuited.

use std::sync::{
  atomic::{AtomicBool, AtomicU8, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  demand::{self, UNBOUNDED},
  error::Error,
  hooks,
  sink::Sink,
  source::Source,
  subscription::{OnceSub, Subscription, Upstream},
};

/// Emits a single `true` once the upstream completes with every item having
/// matched `predicate`, or `false` the moment one does not (cancelling the
/// rest of the upstream).
pub struct AllOp<S, P> {
  source: S,
  predicate: P,
}

impl<S, P> AllOp<S, P> {
  pub(crate) fn new(source: S, predicate: P) -> Self { AllOp { source, predicate } }
}

impl<S, P> Source for AllOp<S, P>
where
  S: Source,
  S::Item: Send + 'static,
  P: FnMut(&S::Item) -> Result<bool, Error> + Send + 'static,
{
  type Item = bool;

  fn subscribe<K>(self, sink: K)
  where
    K: Sink<bool> + Send + 'static,
  {
    let shared = Arc::new(ScalarShared {
      state: AtomicU8::new(EMPTY),
      value: AtomicBool::new(false),
      sink: Mutex::new(sink),
      upstream: OnceSub::new(),
    });
    self.source.subscribe(AllSink { shared, predicate: self.predicate, done: false });
  }
}

// The single result may become available before or after the downstream asks
// for it; these states arbitrate who performs the delivery.
const EMPTY: u8 = 0;
const HAS_VALUE: u8 = 1;
const REQUESTED: u8 = 2;
const DELIVERED: u8 = 3;
const STOPPED: u8 = 4;

/// Holds one deferred boolean and delivers it exactly once, when both the
/// value and downstream demand have arrived.
struct ScalarShared<K> {
  state: AtomicU8,
  value: AtomicBool,
  sink: Mutex<K>,
  upstream: OnceSub,
}

impl<K: Sink<bool>> ScalarShared<K> {
  fn deliver(&self) {
    let value = self.value.load(Ordering::Acquire);
    let mut sink = self.sink.lock();
    sink.on_next(value);
    sink.on_complete();
  }

  /// Stage the result, delivering right away if demand is already waiting.
  fn complete_with(&self, value: bool) {
    self.value.store(value, Ordering::Release);
    let mut curr = self.state.load(Ordering::Acquire);
    loop {
      let next = match curr {
        EMPTY => HAS_VALUE,
        REQUESTED => DELIVERED,
        _ => return,
      };
      match self
        .state
        .compare_exchange_weak(curr, next, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          if next == DELIVERED {
            self.deliver();
          }
          return;
        }
        Err(actual) => curr = actual,
      }
    }
  }

  /// Terminal error: absorbs the state so no value delivery can follow.
  fn fail(&self, err: Error) {
    let prev = self.state.swap(STOPPED, Ordering::AcqRel);
    match prev {
      DELIVERED | STOPPED => hooks::on_error_dropped(err),
      _ => self.sink.lock().on_error(err),
    }
  }
}

impl<K: Sink<bool> + Send> Subscription for ScalarShared<K> {
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      hooks::on_error_dropped(Error::InvalidRequest);
      return;
    }
    let mut curr = self.state.load(Ordering::Acquire);
    loop {
      let next = match curr {
        EMPTY => REQUESTED,
        HAS_VALUE => DELIVERED,
        _ => return,
      };
      match self
        .state
        .compare_exchange_weak(curr, next, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          if next == DELIVERED {
            self.deliver();
          }
          return;
        }
        Err(actual) => curr = actual,
      }
    }
  }

  fn cancel(&self) {
    self.upstream.cancel();
    let _ = self
      .state
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
        (s != DELIVERED && s != STOPPED).then_some(STOPPED)
      });
  }
}

struct AllSink<K, P> {
  shared: Arc<ScalarShared<K>>,
  predicate: P,
  done: bool,
}

impl<T, K, P> Sink<T> for AllSink<K, P>
where
  T: Send + 'static,
  K: Sink<bool> + Send + 'static,
  P: FnMut(&T) -> Result<bool, Error>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    if !self.shared.upstream.set(upstream.subscription()) {
      return;
    }
    self.shared.sink.lock().on_subscribe(Upstream::new(self.shared.clone()));
    upstream.request(UNBOUNDED);
  }

  fn on_next(&mut self, item: T) {
    if self.done {
      return;
    }
    match (self.predicate)(&item) {
      Ok(true) => {}
      Ok(false) => {
        self.done = true;
        self.shared.upstream.cancel();
        self.shared.complete_with(false);
      }
      Err(err) => {
        self.done = true;
        self.shared.upstream.cancel();
        self.shared.fail(err);
      }
    }
  }

  fn on_error(&mut self, err: Error) {
    if self.done {
      hooks::on_error_dropped(err);
      return;
    }
    self.done = true;
    self.shared.fail(err);
  }

  fn on_complete(&mut self) {
    if self.done {
      return;
    }
    self.done = true;
    self.shared.complete_with(true);
  }
}
