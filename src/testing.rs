//! In-tree test instruments: a recording sink, a deliberately rule-ignoring
//! source, and scoped capture of the dropped-signal hooks.

use std::{any::Any, sync::Arc};

use parking_lot::{Mutex, MutexGuard};

use crate::{
  error::Error,
  fusion::FusedQueue,
  hooks,
  sink::Sink,
  source::{trivial::NoopSub, Source},
  subscription::Upstream,
};

/// Everything a sink can observe, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
  Subscribed,
  Next(T),
  Error(Error),
  Complete,
}

struct ProbeInner<T> {
  signals: Mutex<Vec<Signal<T>>>,
  upstream: Mutex<Option<Upstream<T>>>,
}

/// The sink half: hand this to a source.
pub struct TestSink<T> {
  inner: Arc<ProbeInner<T>>,
  auto_request: u64,
}

/// The inspection half: read back what the sink saw, and drive its
/// subscription from the test.
pub struct TestProbe<T> {
  inner: Arc<ProbeInner<T>>,
}

impl<T> Clone for TestProbe<T> {
  fn clone(&self) -> Self { TestProbe { inner: self.inner.clone() } }
}

/// A recording sink that requests `auto_request` as soon as it is subscribed
/// (pass 0 to start with no demand).
pub fn probe<T>(auto_request: u64) -> (TestSink<T>, TestProbe<T>) {
  let inner = Arc::new(ProbeInner { signals: Mutex::new(Vec::new()), upstream: Mutex::new(None) });
  (TestSink { inner: inner.clone(), auto_request }, TestProbe { inner })
}

impl<T> Sink<T> for TestSink<T> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    self.inner.signals.lock().push(Signal::Subscribed);
    *self.inner.upstream.lock() = Some(upstream.clone());
    if self.auto_request > 0 {
      upstream.request(self.auto_request);
    }
  }

  fn on_next(&mut self, item: T) { self.inner.signals.lock().push(Signal::Next(item)); }

  fn on_error(&mut self, err: Error) { self.inner.signals.lock().push(Signal::Error(err)); }

  fn on_complete(&mut self) { self.inner.signals.lock().push(Signal::Complete); }
}

impl<T: Clone> TestProbe<T> {
  /// All items received so far.
  pub fn items(&self) -> Vec<T> {
    self
      .inner
      .signals
      .lock()
      .iter()
      .filter_map(|s| match s {
        Signal::Next(v) => Some(v.clone()),
        _ => None,
      })
      .collect()
  }

  /// The raw signal log.
  pub fn signals(&self) -> Vec<Signal<T>> { self.inner.signals.lock().clone() }
}

impl<T> TestProbe<T> {
  pub fn completed(&self) -> bool {
    self.inner.signals.lock().iter().any(|s| matches!(s, Signal::Complete))
  }

  pub fn error(&self) -> Option<Error> {
    self.inner.signals.lock().iter().find_map(|s| match s {
      Signal::Error(e) => Some(e.clone()),
      _ => None,
    })
  }

  pub fn terminated(&self) -> bool { self.completed() || self.error().is_some() }

  /// Pull more credit through the recorded subscription.
  pub fn request(&self, n: u64) {
    let upstream = self.inner.upstream.lock().clone();
    if let Some(up) = upstream {
      up.request(n);
    }
  }

  pub fn cancel(&self) {
    let upstream = self.inner.upstream.lock().clone();
    if let Some(up) = upstream {
      up.cancel();
    }
  }

  /// The fused queue the source offered, if any.
  pub fn fused_queue(&self) -> Option<Arc<dyn FusedQueue<T>>> {
    self.inner.upstream.lock().as_ref().and_then(|up| up.fused_queue())
  }
}

/// A source that pushes every item and completes, ignoring demand and
/// cancellation alike. Operators are supposed to absorb exactly this kind of
/// rudeness, so their post-terminal paths need it exercised.
pub fn emit_all<T>(items: Vec<T>) -> EmitAllSource<T> { EmitAllSource(items) }

pub struct EmitAllSource<T>(Vec<T>);

impl<T: Send + 'static> Source for EmitAllSource<T> {
  type Item = T;

  fn subscribe<S>(self, mut sink: S)
  where
    S: Sink<T> + Send + 'static,
  {
    sink.on_subscribe(Upstream::new(Arc::new(NoopSub)));
    for item in self.0 {
      sink.on_next(item);
    }
    sink.on_complete();
  }
}

/// Hide a source's fusion capability and record every `request(n)` it
/// receives. Forces operators onto their non-fused path and lets tests
/// assert on replenishment patterns.
pub fn hide<S: Source>(source: S, requests: Arc<Mutex<Vec<u64>>>) -> Hidden<S> {
  Hidden { inner: source, requests }
}

pub struct Hidden<S> {
  inner: S,
  requests: Arc<Mutex<Vec<u64>>>,
}

impl<S: Source> Source for Hidden<S>
where
  S::Item: Send + 'static,
{
  type Item = S::Item;

  fn subscribe<K>(self, sink: K)
  where
    K: Sink<S::Item> + Send + 'static,
  {
    self.inner.subscribe(HiddenSink { sink, requests: self.requests });
  }
}

struct HiddenSink<K> {
  sink: K,
  requests: Arc<Mutex<Vec<u64>>>,
}

impl<T: Send + 'static, K: Sink<T>> Sink<T> for HiddenSink<K> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let sub = Arc::new(LoggedSub { sub: upstream.subscription(), requests: self.requests.clone() });
    // Deliberately no fused queue: the identity is hidden.
    self.sink.on_subscribe(Upstream::new(sub));
  }

  fn on_next(&mut self, item: T) { self.sink.on_next(item) }

  fn on_error(&mut self, err: Error) { self.sink.on_error(err) }

  fn on_complete(&mut self) { self.sink.on_complete() }
}

struct LoggedSub {
  sub: Arc<dyn crate::subscription::Subscription>,
  requests: Arc<Mutex<Vec<u64>>>,
}

impl crate::subscription::Subscription for LoggedSub {
  fn request(&self, n: u64) {
    self.requests.lock().push(n);
    self.sub.request(n);
  }

  fn cancel(&self) { self.sub.cancel() }
}

static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

/// Capture of the process-wide dropped-signal hooks.
///
/// Holding the returned guard serializes hook-swapping tests within the test
/// binary; dropping it restores the default handlers.
pub struct DroppedCapture {
  items: Arc<Mutex<Vec<Box<dyn Any + Send>>>>,
  errors: Arc<Mutex<Vec<Error>>>,
  _guard: MutexGuard<'static, ()>,
}

/// Route the dropped-signal hooks into buffers this capture exposes.
pub fn capture_dropped() -> DroppedCapture {
  let guard = CAPTURE_LOCK.lock();
  let items: Arc<Mutex<Vec<Box<dyn Any + Send>>>> = Arc::new(Mutex::new(Vec::new()));
  let errors: Arc<Mutex<Vec<Error>>> = Arc::new(Mutex::new(Vec::new()));
  {
    let items = items.clone();
    hooks::set_next_dropped(move |item| items.lock().push(item));
  }
  {
    let errors = errors.clone();
    hooks::set_error_dropped(move |err| errors.lock().push(err));
  }
  DroppedCapture { items, errors, _guard: guard }
}

impl DroppedCapture {
  /// Dropped items of type `T`, in arrival order.
  pub fn items<T: Clone + 'static>(&self) -> Vec<T> {
    self
      .items
      .lock()
      .iter()
      .filter_map(|b| b.downcast_ref::<T>().cloned())
      .collect()
  }

  /// Dropped errors, in arrival order.
  pub fn errors(&self) -> Vec<Error> { self.errors.lock().clone() }
}

impl Drop for DroppedCapture {
  fn drop(&mut self) { hooks::reset(); }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::source;

  #[test]
  fn probe_records_signal_order() {
    let (sink, probe) = probe::<i32>(10);
    source::from_iter(1..=2).subscribe(sink);
    assert_eq!(
      probe.signals(),
      vec![Signal::Subscribed, Signal::Next(1), Signal::Next(2), Signal::Complete]
    );
  }

  #[test]
  fn emit_all_ignores_demand() {
    let (sink, probe) = probe::<i32>(0);
    emit_all(vec![1, 2, 3]).subscribe(sink);
    assert_eq!(probe.items(), vec![1, 2, 3]);
    assert!(probe.completed());
  }
}
