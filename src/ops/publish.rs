//! Share one upstream among many subscribers through a bounded prefetch
//! queue, paced by the slowest subscriber.

use std::sync::{
  atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering},
  Arc, OnceLock,
};

use arc_swap::ArcSwap;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::{
  demand::{self, UNBOUNDED},
  error::Error,
  fusion::{FusedQueue, FusionMode},
  hooks,
  queue::{Queue, QueueFactory},
  sink::Sink,
  source::Source,
  subscription::{OnceSub, Subscription, Upstream},
};

const MODE_NONE: u8 = 0;
const MODE_SYNC: u8 = 1;
const MODE_ASYNC: u8 = 2;

/// Multicast the source for the duration of `transform`.
///
/// The transform receives a [`MulticastSource`] it may subscribe any number
/// of times; every subscriber shares one upstream subscription and one
/// `prefetch`-bounded queue, and no item is emitted until *all* current
/// subscribers have demand for it.
pub struct PublishOp<S: Source, F> {
  source: S,
  transform: F,
  prefetch: usize,
  queue_factory: QueueFactory<S::Item>,
}

impl<S: Source, F> PublishOp<S, F> {
  pub(crate) fn new(
    source: S,
    prefetch: usize,
    queue_factory: QueueFactory<S::Item>,
    transform: F,
  ) -> Self {
    assert!(prefetch > 0, "prefetch > 0 required but it was {prefetch}");
    PublishOp { source, transform, prefetch, queue_factory }
  }
}

impl<S, F, O> Source for PublishOp<S, F>
where
  S: Source,
  S::Item: Clone + Send + 'static,
  F: FnOnce(MulticastSource<S::Item>) -> O,
  O: Source,
{
  type Item = O::Item;

  fn subscribe<K>(self, sink: K)
  where
    K: Sink<O::Item> + Send + 'static,
  {
    let multicaster = Arc::new(Multicaster::new(self.prefetch, self.queue_factory));
    let out = (self.transform)(MulticastSource { parent: multicaster.clone() });
    out.subscribe(TransformSink { sink, parent: multicaster.clone() });
    self.source.subscribe(UpstreamSink { parent: multicaster });
  }
}

/// The shared side of the transform: a cloneable source any number of sinks
/// can join.
pub struct MulticastSource<T> {
  parent: Arc<Multicaster<T>>,
}

impl<T> Clone for MulticastSource<T> {
  fn clone(&self) -> Self { MulticastSource { parent: self.parent.clone() } }
}

impl<T: Clone + Send + 'static> Source for MulticastSource<T> {
  type Item = T;

  fn subscribe<K>(self, sink: K)
  where
    K: Sink<T> + Send + 'static,
  {
    let parent = self.parent;
    let client = Arc::new(PublishClient {
      parent: parent.clone(),
      sink: Mutex::new(Box::new(sink)),
      requested: AtomicU64::new(0),
      once: AtomicBool::new(false),
    });
    client.sink.lock().on_subscribe(Upstream::new(client.clone()));

    if parent.add(&client) {
      if client.once.load(Ordering::Acquire) {
        // Cancelled from inside its own on_subscribe.
        parent.remove_and_drain(Arc::as_ptr(&client));
      } else {
        parent.drain();
      }
    } else {
      // Terminated before the join: deliver the stored terminal directly.
      let mut sink = client.sink.lock();
      match parent.error.get() {
        Some(err) => sink.on_error(err.clone()),
        None => sink.on_complete(),
      }
    }
  }
}

enum QueueKind<T> {
  Plain(Arc<dyn Queue<T>>),
  Fused(Arc<dyn FusedQueue<T>>),
}

impl<T> QueueKind<T> {
  fn poll(&self) -> Result<Option<T>, Error> {
    match self {
      QueueKind::Plain(q) => Ok(q.poll()),
      QueueKind::Fused(q) => q.poll(),
    }
  }

  fn is_empty(&self) -> bool {
    match self {
      QueueKind::Plain(q) => q.is_empty(),
      QueueKind::Fused(q) => q.is_empty(),
    }
  }

  fn clear(&self) {
    match self {
      QueueKind::Plain(q) => q.clear(),
      QueueKind::Fused(q) => q.clear(),
    }
  }
}

enum ClientSet<T> {
  /// Zero or more live subscribers. An empty vector is the idle state.
  Active(Vec<Arc<PublishClient<T>>>),
  /// Absorbing: no further joins; the stored terminal is replayed to
  /// latecomers.
  Terminated,
}

struct Multicaster<T> {
  prefetch: usize,
  /// Replenishment threshold: after this many forwarded items the upstream
  /// is asked for `limit` more.
  limit: usize,
  queue_factory: QueueFactory<T>,
  upstream: OnceSub,
  source_mode: AtomicU8,
  queue: OnceLock<QueueKind<T>>,
  subscribers: ArcSwap<ClientSet<T>>,
  wip: CachePadded<AtomicUsize>,
  connected: AtomicBool,
  done: AtomicBool,
  cancelled: AtomicBool,
  // Written strictly before `done`; read only after observing `done` or the
  // terminated subscriber set.
  error: OnceLock<Error>,
  // Running count toward the next replenishment; touched only inside the
  // serialized drain.
  produced: AtomicUsize,
}

impl<T: Clone + Send + 'static> Multicaster<T> {
  fn new(prefetch: usize, queue_factory: QueueFactory<T>) -> Self {
    Multicaster {
      prefetch,
      limit: prefetch - (prefetch >> 2),
      queue_factory,
      upstream: OnceSub::new(),
      source_mode: AtomicU8::new(MODE_NONE),
      queue: OnceLock::new(),
      subscribers: ArcSwap::from_pointee(ClientSet::Active(Vec::new())),
      wip: CachePadded::new(AtomicUsize::new(0)),
      connected: AtomicBool::new(false),
      done: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
      error: OnceLock::new(),
      produced: AtomicUsize::new(0),
    }
  }

  // ---- upstream edge -------------------------------------------------------

  fn connect(&self, upstream: Upstream<T>) {
    if !self.upstream.set(upstream.subscription()) {
      return;
    }
    if let Some(fused) = upstream.fused_queue() {
      match fused.request_fusion(FusionMode::ANY) {
        FusionMode::SYNC => {
          self.source_mode.store(MODE_SYNC, Ordering::Relaxed);
          let _ = self.queue.set(QueueKind::Fused(fused));
          // In SYNC mode the queue *is* the source: completion is an empty
          // poll, so the stream is done the moment it is connected.
          self.done.store(true, Ordering::Release);
          self.connected.store(true, Ordering::Release);
          self.drain();
          return;
        }
        FusionMode::ASYNC => {
          self.source_mode.store(MODE_ASYNC, Ordering::Relaxed);
          let _ = self.queue.set(QueueKind::Fused(fused));
          self.connected.store(true, Ordering::Release);
          upstream.request(self.prefetch as u64);
          return;
        }
        _ => {}
      }
    }
    let queue = (self.queue_factory)(self.prefetch);
    let _ = self.queue.set(QueueKind::Plain(queue));
    self.connected.store(true, Ordering::Release);
    upstream.request(self.prefetch as u64);
  }

  fn upstream_next(&self, item: T) {
    if self.done.load(Ordering::Acquire) {
      hooks::on_next_dropped(item);
      return;
    }
    if self.source_mode.load(Ordering::Relaxed) != MODE_ASYNC {
      let offered = match self.queue.get() {
        Some(QueueKind::Plain(q)) => q.offer(item),
        // ASYNC is excluded above and SYNC never signals on_next.
        _ => false,
      };
      if !offered {
        self.upstream_error(Error::QueueOverflow);
        return;
      }
    }
    self.drain();
  }

  fn upstream_error(&self, err: Error) {
    if self.done.load(Ordering::Acquire) {
      hooks::on_error_dropped(err);
      return;
    }
    tracing::debug!(%err, "multicaster terminating");
    let _ = self.error.set(err);
    self.done.store(true, Ordering::Release);
    self.drain();
  }

  fn upstream_complete(&self) {
    self.done.store(true, Ordering::Release);
    self.drain();
  }

  // ---- subscriber set ------------------------------------------------------

  fn add(&self, client: &Arc<PublishClient<T>>) -> bool {
    loop {
      let curr = self.subscribers.load_full();
      let next = match &*curr {
        ClientSet::Terminated => return false,
        ClientSet::Active(v) => {
          let mut v = v.clone();
          v.push(client.clone());
          Arc::new(ClientSet::Active(v))
        }
      };
      let prev = self.subscribers.compare_and_swap(&curr, next);
      if Arc::ptr_eq(&prev, &curr) {
        return true;
      }
    }
  }

  /// Remove the client identified by address, then drain so the remaining
  /// subscribers' common demand is recomputed.
  fn remove_and_drain(&self, client: *const PublishClient<T>) {
    loop {
      let curr = self.subscribers.load_full();
      let next = match &*curr {
        ClientSet::Terminated => return,
        ClientSet::Active(v) => {
          let Some(at) = v.iter().position(|c| std::ptr::eq(Arc::as_ptr(c), client)) else {
            return;
          };
          let mut v = v.clone();
          v.remove(at);
          Arc::new(ClientSet::Active(v))
        }
      };
      let prev = self.subscribers.compare_and_swap(&curr, next);
      if Arc::ptr_eq(&prev, &curr) {
        self.drain();
        return;
      }
    }
  }

  /// Swap the set to the absorbing state and hand back whoever was present.
  fn terminate_subscribers(&self) -> Vec<Arc<PublishClient<T>>> {
    match &*self.subscribers.swap(Arc::new(ClientSet::Terminated)) {
      ClientSet::Active(v) => v.clone(),
      ClientSet::Terminated => Vec::new(),
    }
  }

  // ---- termination from the transform edge ---------------------------------

  fn transform_cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.terminate();
    }
  }

  fn terminate(&self) {
    self.upstream.cancel();
    self.subscribers.store(Arc::new(ClientSet::Terminated));
    if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      if self.connected.load(Ordering::Acquire) {
        if let Some(q) = self.queue.get() {
          q.clear();
        }
      }
    }
  }

  // ---- drain ---------------------------------------------------------------

  fn drain(&self) {
    if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
      return;
    }
    if self.source_mode.load(Ordering::Relaxed) == MODE_SYNC {
      self.drain_sync();
    } else {
      self.drain_async();
    }
  }

  fn clear_queue(&self) {
    if let Some(q) = self.queue.get() {
      q.clear();
    }
  }

  fn min_requested(clients: &[Arc<PublishClient<T>>]) -> u64 {
    clients
      .iter()
      .map(|c| c.requested.load(Ordering::Acquire))
      .min()
      .unwrap_or(0)
  }

  fn broadcast_next(clients: &[Arc<PublishClient<T>>], item: T) {
    let last = clients.len() - 1;
    for c in &clients[..last] {
      c.sink.lock().on_next(item.clone());
    }
    clients[last].sink.lock().on_next(item);
  }

  fn fail_all(&self, err: Error) {
    let _ = self.error.set(err.clone());
    for c in self.terminate_subscribers() {
      c.sink.lock().on_error(err.clone());
    }
  }

  fn complete_all(&self) {
    for c in self.terminate_subscribers() {
      c.sink.lock().on_complete();
    }
  }

  fn drain_sync(&self) {
    let mut missed = 1usize;
    loop {
      if self.connected.load(Ordering::Acquire) {
        if self.cancelled.load(Ordering::Acquire) {
          self.clear_queue();
          return;
        }
        let Some(queue) = self.queue.get() else { return };
        let set = self.subscribers.load_full();
        if let ClientSet::Active(clients) = &*set {
          if !clients.is_empty() {
            let r = Self::min_requested(clients);
            let mut e = 0u64;

            while e != r {
              if self.cancelled.load(Ordering::Acquire) {
                self.clear_queue();
                return;
              }
              let item = match queue.poll() {
                Ok(item) => item,
                Err(err) => {
                  queue.clear();
                  self.fail_all(err);
                  return;
                }
              };
              match item {
                None => {
                  self.complete_all();
                  return;
                }
                Some(item) => {
                  Self::broadcast_next(clients, item);
                  e += 1;
                }
              }
            }

            if e == r {
              if self.cancelled.load(Ordering::Acquire) {
                self.clear_queue();
                return;
              }
              if queue.is_empty() {
                self.complete_all();
                return;
              }
            }

            if e != 0 {
              for c in clients {
                c.produced(e);
              }
            }
          }
        }
      }

      let left = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if left == 0 {
        break;
      }
      missed = left;
    }
  }

  fn drain_async(&self) {
    let mut missed = 1usize;
    let mut p = self.produced.load(Ordering::Relaxed);
    loop {
      if self.connected.load(Ordering::Acquire) {
        if self.cancelled.load(Ordering::Acquire) {
          self.clear_queue();
          return;
        }
        let Some(queue) = self.queue.get() else { return };
        let set = self.subscribers.load_full();
        if let ClientSet::Active(clients) = &*set {
          if !clients.is_empty() {
            let r = Self::min_requested(clients);
            let mut e = 0u64;

            while e != r {
              if self.cancelled.load(Ordering::Acquire) {
                self.clear_queue();
                return;
              }
              let d = self.done.load(Ordering::Acquire);
              let item = match queue.poll() {
                Ok(item) => item,
                Err(err) => {
                  self.upstream.cancel();
                  queue.clear();
                  self.fail_all(err);
                  return;
                }
              };
              let empty = item.is_none();

              if d {
                if let Some(err) = self.error.get() {
                  queue.clear();
                  self.fail_all(err.clone());
                  return;
                } else if empty {
                  self.complete_all();
                  return;
                }
              }

              let Some(item) = item else { break };

              Self::broadcast_next(clients, item);
              e += 1;

              p += 1;
              if p == self.limit {
                self.upstream.request(self.limit as u64);
                p = 0;
              }
            }

            if e == r {
              if self.cancelled.load(Ordering::Acquire) {
                self.clear_queue();
                return;
              }
              let d = self.done.load(Ordering::Acquire);
              let empty = queue.is_empty();
              if d {
                if let Some(err) = self.error.get() {
                  queue.clear();
                  self.fail_all(err.clone());
                  return;
                } else if empty {
                  self.complete_all();
                  return;
                }
              }
            }

            if e != 0 {
              for c in clients {
                c.produced(e);
              }
            }
          }
        }
      }

      self.produced.store(p, Ordering::Relaxed);

      let left = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if left == 0 {
        break;
      }
      missed = left;
    }
  }
}

/// The multicaster wearing its sink hat toward the real upstream.
struct UpstreamSink<T> {
  parent: Arc<Multicaster<T>>,
}

impl<T: Clone + Send + 'static> Sink<T> for UpstreamSink<T> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.parent.connect(upstream) }

  fn on_next(&mut self, item: T) { self.parent.upstream_next(item) }

  fn on_error(&mut self, err: Error) { self.parent.upstream_error(err) }

  fn on_complete(&mut self) { self.parent.upstream_complete() }
}

/// One joined subscriber: demand counter, cancel latch, and the sink the
/// drain broadcasts into.
struct PublishClient<T> {
  parent: Arc<Multicaster<T>>,
  sink: Mutex<Box<dyn Sink<T> + Send>>,
  requested: AtomicU64,
  once: AtomicBool,
}

impl<T: Clone + Send + 'static> PublishClient<T> {
  fn produced(&self, n: u64) {
    if self.requested.load(Ordering::Acquire) != UNBOUNDED {
      demand::produced(&self.requested, n);
    }
  }
}

impl<T: Clone + Send + 'static> Subscription for PublishClient<T> {
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      hooks::on_error_dropped(Error::InvalidRequest);
      return;
    }
    demand::add_cap(&self.requested, n);
    self.parent.drain();
  }

  fn cancel(&self) {
    if !self.once.swap(true, Ordering::AcqRel) {
      // A concurrent drain keeps broadcasting to its snapshot, so one
      // in-flight item may still arrive after this returns.
      self.parent.remove_and_drain(self as *const PublishClient<T>);
    }
  }
}

/// The sink between the transform's output and the real downstream: forwards
/// signals, ties the downstream's cancel to the multicaster, and tears the
/// multicaster down on transform terminals.
struct TransformSink<T, K> {
  sink: K,
  parent: Arc<Multicaster<T>>,
}

impl<T, R, K> Sink<R> for TransformSink<T, K>
where
  T: Clone + Send + 'static,
  K: Sink<R>,
{
  fn on_subscribe(&mut self, upstream: Upstream<R>) {
    let sub = Arc::new(TransformSub {
      upstream: upstream.subscription(),
      parent: self.parent.clone(),
    });
    // Fusion offered by the transform's own source passes through untouched;
    // the multicaster's client side never fuses.
    let wrapped = match upstream.fused_queue() {
      Some(queue) => Upstream::with_queue(sub, queue),
      None => Upstream::new(sub),
    };
    self.sink.on_subscribe(wrapped);
  }

  fn on_next(&mut self, item: R) { self.sink.on_next(item) }

  fn on_error(&mut self, err: Error) {
    self.parent.terminate();
    self.sink.on_error(err);
  }

  fn on_complete(&mut self) {
    self.parent.terminate();
    self.sink.on_complete();
  }
}

struct TransformSub<T> {
  upstream: Arc<dyn Subscription>,
  parent: Arc<Multicaster<T>>,
}

impl<T: Clone + Send + 'static> Subscription for TransformSub<T> {
  fn request(&self, n: u64) { self.upstream.request(n) }

  fn cancel(&self) {
    self.upstream.cancel();
    self.parent.transform_cancel();
  }
}
