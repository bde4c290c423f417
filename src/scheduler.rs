//! The scheduler boundary consumed by [`subscribe_on`](crate::Source::subscribe_on).
//!
//! A [`Scheduler`] takes a one-shot [`Task`] and answers with a
//! [`CancelHandle`]. The whole contract: the task runs at most once, the
//! handle best-effort prevents a not-yet-started run, and the handle itself
//! is invoked at most once (enforced by [`TaskSlot`] where handles race
//! cancellation).

use parking_lot::Mutex;

pub mod manual;
pub mod pool;
pub mod thread;

pub use manual::ManualScheduler;
pub use thread::ThreadScheduler;

/// A unit of work that runs at most once.
pub struct Task(Box<dyn FnOnce() + Send>);

impl Task {
  pub fn new(f: impl FnOnce() + Send + 'static) -> Self { Task(Box::new(f)) }

  pub fn run(self) { (self.0)() }
}

/// Best-effort cancellation of one scheduled task. Consuming `invoke` makes
/// double invocation unrepresentable; dropping the handle forgets the task
/// without cancelling it.
pub struct CancelHandle(Option<Box<dyn FnOnce() + Send>>);

impl CancelHandle {
  pub fn new(f: impl FnOnce() + Send + 'static) -> Self { CancelHandle(Some(Box::new(f))) }

  /// A handle for work that cannot be cancelled.
  pub fn noop() -> Self { CancelHandle(None) }

  pub fn invoke(mut self) {
    if let Some(f) = self.0.take() {
      f()
    }
  }
}

/// Hands one-shot tasks to some executor.
pub trait Scheduler: Send + Sync {
  fn schedule(&self, task: Task) -> CancelHandle;
}

impl<SD: Scheduler + ?Sized> Scheduler for std::sync::Arc<SD> {
  fn schedule(&self, task: Task) -> CancelHandle { (**self).schedule(task) }
}

enum SlotState {
  Empty,
  Scheduled(CancelHandle),
  Finished,
  Cancelled,
}

/// Holder for a scheduled task's cancel handle.
///
/// The handle arrives asynchronously relative to any cancel request, so the
/// slot is a small state machine: `Empty → Scheduled → Finished | Cancelled`.
/// A handle that loses the race against `cancel` is invoked immediately by
/// the losing side, which keeps every handle invoked at most once. Handles
/// always run outside the slot's lock.
pub struct TaskSlot {
  state: Mutex<SlotState>,
}

impl Default for TaskSlot {
  fn default() -> Self { Self::new() }
}

impl TaskSlot {
  pub fn new() -> Self { TaskSlot { state: Mutex::new(SlotState::Empty) } }

  /// Store the scheduler's handle. If the slot was already cancelled the
  /// handle is invoked on the spot; if the task already finished it is
  /// dropped.
  pub fn set_handle(&self, handle: CancelHandle) {
    let mut state = self.state.lock();
    match &*state {
      SlotState::Empty => *state = SlotState::Scheduled(handle),
      SlotState::Cancelled => {
        drop(state);
        handle.invoke();
      }
      SlotState::Scheduled(_) | SlotState::Finished => {}
    }
  }

  /// Mark the task as having run. Returns `false` if cancellation won the
  /// race first.
  pub fn finish(&self) -> bool {
    let mut state = self.state.lock();
    match &*state {
      SlotState::Cancelled => false,
      _ => {
        *state = SlotState::Finished;
        true
      }
    }
  }

  /// Transition to cancelled, invoking a stored handle. Idempotent; a no-op
  /// after `finish`.
  pub fn cancel(&self) {
    let handle = {
      let mut state = self.state.lock();
      match std::mem::replace(&mut *state, SlotState::Cancelled) {
        SlotState::Scheduled(h) => Some(h),
        SlotState::Finished => {
          *state = SlotState::Finished;
          None
        }
        SlotState::Empty | SlotState::Cancelled => None,
      }
    };
    if let Some(h) = handle {
      h.invoke();
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(&*self.state.lock(), SlotState::Cancelled)
  }
}
