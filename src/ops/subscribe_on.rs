//! Move the upstream subscription (and optionally each request) onto a
//! scheduler.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
  deferred::DeferredSubscription,
  demand, hooks,
  scheduler::{Scheduler, Task, TaskSlot},
  sink::Sink,
  source::Source,
  subscription::{Subscription, Upstream},
  Error,
};

/// Scheduler boundary with two orthogonal toggles.
///
/// - [`eager_cancel`](SubscribeOnOp::eager_cancel): give the downstream a
///   subscription *before* the scheduled subscribe has run, so it can cancel
///   the boundary early; the scheduled task itself becomes cancellable.
/// - [`request_on`](SubscribeOnOp::request_on): re-schedule every
///   `request(n)` onto the scheduler as well, instead of forwarding it on
///   the calling thread.
pub struct SubscribeOnOp<S, SD> {
  source: S,
  scheduler: SD,
  eager_cancel: bool,
  request_on: bool,
}

impl<S, SD> SubscribeOnOp<S, SD> {
  pub(crate) fn new(source: S, scheduler: SD) -> Self {
    SubscribeOnOp { source, scheduler, eager_cancel: false, request_on: false }
  }

  /// Let the downstream cancel before the scheduled subscribe has run.
  pub fn eager_cancel(mut self, eager: bool) -> Self {
    self.eager_cancel = eager;
    self
  }

  /// Also move every `request(n)` onto the scheduler.
  pub fn request_on(mut self, request_on: bool) -> Self {
    self.request_on = request_on;
    self
  }
}

impl<S, SD> Source for SubscribeOnOp<S, SD>
where
  S: Source + Send + 'static,
  S::Item: Send + 'static,
  SD: Scheduler + 'static,
{
  type Item = S::Item;

  fn subscribe<K>(self, mut sink: K)
  where
    K: Sink<S::Item> + Send + 'static,
  {
    let scheduler: Arc<dyn Scheduler> = Arc::new(self.scheduler);
    let source = self.source;
    match (self.eager_cancel, self.request_on) {
      (false, false) => {
        // Fire and forget: the boundary has no identity of its own.
        let _ = scheduler.schedule(Task::new(move || source.subscribe(sink)));
      }
      (false, true) => {
        let sched = scheduler.clone();
        let _ = scheduler.schedule(Task::new(move || {
          source.subscribe(RequestOnSink { sink, scheduler: sched });
        }));
      }
      (true, false) => {
        let shared =
          Arc::new(EagerShared { deferred: DeferredSubscription::new(), future: TaskSlot::new() });
        sink.on_subscribe(Upstream::new(shared.clone()));
        let boundary = BoundarySink { deferred: DeferredTarget::Eager(shared.clone()), sink };
        let handle = scheduler.schedule(Task::new(move || source.subscribe(boundary)));
        shared.future.set_handle(handle);
      }
      (true, true) => {
        let shared = Arc::new_cyclic(|me| ClassicShared {
          deferred: DeferredSubscription::new(),
          future: TaskSlot::new(),
          tasks: Mutex::new(Some(SmallVec::new())),
          scheduler: scheduler.clone(),
          me: me.clone(),
        });
        sink.on_subscribe(Upstream::new(shared.clone()));
        let boundary = BoundarySink { deferred: DeferredTarget::Classic(shared.clone()), sink };
        let handle = scheduler.schedule(Task::new(move || source.subscribe(boundary)));
        shared.future.set_handle(handle);
      }
    }
  }
}

/// Non-eager, request-on: forwards signals untouched, bounces demand through
/// the scheduler.
struct RequestOnSink<K> {
  sink: K,
  scheduler: Arc<dyn Scheduler>,
}

impl<T, K> Sink<T> for RequestOnSink<K>
where
  T: Send + 'static,
  K: Sink<T>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let shared = Arc::new(RequestOnSub {
      upstream: upstream.subscription(),
      scheduler: self.scheduler.clone(),
    });
    self.sink.on_subscribe(Upstream::new(shared));
  }

  fn on_next(&mut self, item: T) { self.sink.on_next(item) }

  fn on_error(&mut self, err: Error) { self.sink.on_error(err) }

  fn on_complete(&mut self) { self.sink.on_complete() }
}

struct RequestOnSub {
  upstream: Arc<dyn Subscription>,
  scheduler: Arc<dyn Scheduler>,
}

impl Subscription for RequestOnSub {
  fn request(&self, n: u64) {
    let upstream = self.upstream.clone();
    let _ = self.scheduler.schedule(Task::new(move || upstream.request(n)));
  }

  fn cancel(&self) { self.upstream.cancel(); }
}

/// Eager-cancel state: the deferred subscription the downstream talks to,
/// plus the slot holding the scheduled subscribe's cancel handle.
struct EagerShared {
  deferred: DeferredSubscription,
  future: TaskSlot,
}

impl Subscription for EagerShared {
  fn request(&self, n: u64) { self.deferred.request(n) }

  fn cancel(&self) {
    self.deferred.cancel();
    self.future.cancel();
  }
}

enum DeferredTarget {
  Eager(Arc<EagerShared>),
  Classic(Arc<ClassicShared>),
}

impl DeferredTarget {
  fn deferred(&self) -> &DeferredSubscription {
    match self {
      DeferredTarget::Eager(s) => &s.deferred,
      DeferredTarget::Classic(s) => &s.deferred,
    }
  }
}

/// The sink handed to the scheduled subscribe in eager modes: routes the real
/// upstream into the deferred subscription, everything else straight through.
struct BoundarySink<K> {
  deferred: DeferredTarget,
  sink: K,
}

impl<T, K> Sink<T> for BoundarySink<K>
where
  T: Send + 'static,
  K: Sink<T>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    // The downstream already has its subscription. A rejected set means the
    // boundary was cancelled first; the deferred cancels the newcomer.
    self.deferred.deferred().set(upstream.subscription());
  }

  fn on_next(&mut self, item: T) { self.sink.on_next(item) }

  fn on_error(&mut self, err: Error) { self.sink.on_error(err) }

  fn on_complete(&mut self) { self.sink.on_complete() }
}

type TaskList = SmallVec<[Arc<ScheduledRequest>; 2]>;

/// Classic mode: eager cancel plus per-request scheduling, tracking every
/// in-flight request task so a master cancel can sweep them.
struct ClassicShared {
  deferred: DeferredSubscription,
  future: TaskSlot,
  // `None` once disposed; taken in a single ownership transfer.
  tasks: Mutex<Option<TaskList>>,
  scheduler: Arc<dyn Scheduler>,
  me: Weak<ClassicShared>,
}

impl ClassicShared {
  fn add(&self, sr: &Arc<ScheduledRequest>) -> bool {
    let mut tasks = self.tasks.lock();
    match tasks.as_mut() {
      Some(list) => {
        list.push(sr.clone());
        true
      }
      None => {
        drop(tasks);
        // Already disposed: mark the request cancelled so the handle that
        // arrives below kills the scheduled task immediately.
        sr.slot.cancel();
        false
      }
    }
  }

  fn remove(&self, sr: &Arc<ScheduledRequest>) {
    let mut tasks = self.tasks.lock();
    if let Some(list) = tasks.as_mut() {
      list.retain(|t| !Arc::ptr_eq(t, sr));
    }
  }

  fn dispose(&self) {
    let snapshot = self.tasks.lock().take();
    if let Some(list) = snapshot {
      // No further adds can land after the take. A task finishing now races
      // its own removal against this sweep, but it operates on the detached
      // snapshot, which is harmless.
      for sr in list {
        sr.slot.cancel();
      }
    }
  }

  /// Body of one scheduled request task.
  fn fire(&self, sr: &Arc<ScheduledRequest>) {
    // Forward first: a cancel landing right now has already let this demand
    // through, which the protocol tolerates.
    self.deferred.request(sr.n);
    if sr.slot.finish() {
      self.remove(sr);
    }
  }
}

impl Subscription for ClassicShared {
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      hooks::on_error_dropped(Error::InvalidRequest);
      return;
    }
    let sr = Arc::new(ScheduledRequest { n, slot: TaskSlot::new() });
    self.add(&sr);
    let parent = match self.me.upgrade() {
      Some(p) => p,
      None => return,
    };
    // Scheduled even when already disposed: the slot is cancelled, so the
    // arriving handle is invoked on the spot and the task never fires.
    let task_sr = sr.clone();
    let handle = self
      .scheduler
      .schedule(Task::new(move || parent.fire(&task_sr)));
    sr.slot.set_handle(handle);
  }

  fn cancel(&self) {
    self.deferred.cancel();
    self.future.cancel();
    self.dispose();
  }
}

struct ScheduledRequest {
  n: u64,
  slot: TaskSlot,
}

#[cfg(test)]
mod test {
  use std::{
    sync::mpsc::channel,
    thread,
    time::Duration,
  };

  use super::*;
  use crate::{scheduler::ManualScheduler, source, testing};

  /// Reports which thread the wrapped source was subscribed on.
  struct ThreadReporter<S> {
    inner: S,
    tx: std::sync::mpsc::Sender<thread::ThreadId>,
  }

  impl<S: Source> Source for ThreadReporter<S> {
    type Item = S::Item;

    fn subscribe<K>(self, sink: K)
    where
      K: Sink<S::Item> + Send + 'static,
    {
      self.tx.send(thread::current().id()).unwrap();
      self.inner.subscribe(sink);
    }
  }

  #[test]
  fn subscribes_on_the_scheduler_thread() {
    let (tx, rx) = channel();
    let caller = thread::current().id();
    let (sink, probe) = testing::probe::<i32>(demand::UNBOUNDED);
    ThreadReporter { inner: source::from_iter(1..=4), tx }
      .subscribe_on(crate::scheduler::ThreadScheduler)
      .subscribe(sink);
    let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(worker, caller);
    // The subscribe ran on the worker; emission is synchronous with it, so
    // once it reports the items follow promptly.
    for _ in 0..50 {
      if probe.completed() {
        break;
      }
      thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(probe.items(), vec![1, 2, 3, 4]);
    assert!(probe.completed());
  }

  #[test]
  fn plain_mode_runs_one_task() {
    let sched = ManualScheduler::new();
    let (sink, probe) = testing::probe::<i32>(demand::UNBOUNDED);
    source::from_iter(1..=3).subscribe_on(sched.clone()).subscribe(sink);
    assert!(probe.signals().is_empty());
    assert_eq!(sched.run_all(), 1);
    assert_eq!(probe.items(), vec![1, 2, 3]);
    assert!(probe.completed());
  }

  #[test]
  fn request_on_reschedules_demand() {
    let sched = ManualScheduler::new();
    let (sink, probe) = testing::probe::<i32>(0);
    source::from_iter(1..=3)
      .subscribe_on(sched.clone())
      .request_on(true)
      .subscribe(sink);
    // Task 1: the subscribe itself.
    assert_eq!(sched.run_all(), 1);
    assert!(probe.items().is_empty());
    probe.request(2);
    // The demand itself became a scheduled task.
    assert!(probe.items().is_empty());
    assert_eq!(sched.run_all(), 1);
    assert_eq!(probe.items(), vec![1, 2]);
  }

  /// Records whether `subscribe` was ever invoked on the wrapped source.
  struct Tracked<S> {
    inner: S,
    subscribed: Arc<std::sync::atomic::AtomicBool>,
  }

  impl<S: Source> Source for Tracked<S> {
    type Item = S::Item;

    fn subscribe<K>(self, sink: K)
    where
      K: Sink<S::Item> + Send + 'static,
    {
      self.subscribed.store(true, std::sync::atomic::Ordering::SeqCst);
      self.inner.subscribe(sink);
    }
  }

  #[test]
  fn eager_cancel_before_dispatch_suppresses_subscribe() {
    let sched = ManualScheduler::new();
    let subscribed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let (sink, probe) = testing::probe::<i32>(0);
    Tracked { inner: source::from_iter(1..=3), subscribed: subscribed.clone() }
      .subscribe_on(sched.clone())
      .eager_cancel(true)
      .subscribe(sink);

    probe.cancel();
    assert_eq!(sched.cancellations(), 1);
    assert_eq!(sched.run_all(), 0);
    assert!(!subscribed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!probe.terminated());
  }

  #[test]
  fn eager_demand_is_buffered_until_the_task_runs() {
    let sched = ManualScheduler::new();
    let (sink, probe) = testing::probe::<i32>(2);
    source::from_iter(1..=5)
      .subscribe_on(sched.clone())
      .eager_cancel(true)
      .subscribe(sink);
    assert!(probe.items().is_empty());
    sched.run_all();
    assert_eq!(probe.items(), vec![1, 2]);
  }

  #[test]
  fn classic_mode_schedules_each_request() {
    let sched = ManualScheduler::new();
    let (sink, probe) = testing::probe::<i32>(0);
    source::from_iter(1..=5)
      .subscribe_on(sched.clone())
      .eager_cancel(true)
      .request_on(true)
      .subscribe(sink);
    sched.run_all();
    probe.request(2);
    probe.request(1);
    assert!(probe.items().is_empty());
    assert_eq!(sched.run_all(), 2);
    assert_eq!(probe.items(), vec![1, 2, 3]);
  }

  #[test]
  fn classic_master_cancel_sweeps_pending_requests() {
    let sched = ManualScheduler::new();
    let (sink, probe) = testing::probe::<i32>(0);
    source::from_iter(1..=5)
      .subscribe_on(sched.clone())
      .eager_cancel(true)
      .request_on(true)
      .subscribe(sink);
    sched.run_all();
    probe.request(2);
    probe.cancel();
    // The pending request task was cancelled along with the boundary.
    assert_eq!(sched.run_all(), 0);
    assert!(probe.items().is_empty());
    assert!(sched.cancellations() >= 1);
  }
}
