//! A scheduler driven by the test, for deterministic boundary tests.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use super::{CancelHandle, Scheduler, Task};

/// Queues every task until the driver executes it with [`run_next`] or
/// [`run_all`]; cancel handles pull the task back out and are counted.
///
/// [`run_next`]: ManualScheduler::run_next
/// [`run_all`]: ManualScheduler::run_all
#[derive(Clone, Default)]
pub struct ManualScheduler {
  inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
  queue: Mutex<VecDeque<Arc<Entry>>>,
  cancel_invocations: AtomicUsize,
}

#[derive(Default)]
struct Entry {
  task: Mutex<Option<Task>>,
}

impl ManualScheduler {
  pub fn new() -> Self { Self::default() }

  /// Run the oldest pending task; `false` when nothing is pending.
  pub fn run_next(&self) -> bool {
    loop {
      let entry = match self.inner.queue.lock().pop_front() {
        Some(e) => e,
        None => return false,
      };
      // A cancelled entry stays queued but loses its task; skip it.
      let task = entry.task.lock().take();
      if let Some(task) = task {
        task.run();
        return true;
      }
    }
  }

  /// Run pending tasks (including ones scheduled while running) until the
  /// queue is dry. Returns how many ran.
  pub fn run_all(&self) -> usize {
    let mut ran = 0;
    while self.run_next() {
      ran += 1;
    }
    ran
  }

  pub fn pending(&self) -> usize { self.inner.queue.lock().len() }

  /// How many cancel handles have been invoked.
  pub fn cancellations(&self) -> usize { self.inner.cancel_invocations.load(Ordering::SeqCst) }
}

impl Scheduler for ManualScheduler {
  fn schedule(&self, task: Task) -> CancelHandle {
    let entry = Arc::new(Entry { task: Mutex::new(Some(task)) });
    self.inner.queue.lock().push_back(entry.clone());
    let inner = self.inner.clone();
    CancelHandle::new(move || {
      inner.cancel_invocations.fetch_add(1, Ordering::SeqCst);
      entry.task.lock().take();
    })
  }
}
