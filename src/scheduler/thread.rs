//! One spawned thread per task.

use std::{sync::Arc, thread};

use parking_lot::Mutex;

use super::{CancelHandle, Scheduler, Task};

/// Runs every task on a fresh thread. Cancellation races the spawn: whichever
/// side takes the task out of the shared slot first wins, so the task still
/// runs at most once.
#[derive(Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
  fn schedule(&self, task: Task) -> CancelHandle {
    let slot = Arc::new(Mutex::new(Some(task)));
    let runner = slot.clone();
    thread::spawn(move || {
      let task = runner.lock().take();
      if let Some(task) = task {
        task.run();
      }
    });
    CancelHandle::new(move || {
      slot.lock().take();
    })
  }
}

#[cfg(test)]
mod test {
  use std::{
    sync::mpsc::channel,
    time::Duration,
  };

  use super::*;

  #[test]
  fn task_runs_off_the_calling_thread() {
    let (tx, rx) = channel();
    let caller = thread::current().id();
    ThreadScheduler.schedule(Task::new(move || {
      tx.send(thread::current().id()).unwrap();
    }));
    let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(worker, caller);
  }
}
