//! Scheduler on top of a `futures` thread pool.

use futures::{future::RemoteHandle, task::SpawnExt};

use super::{CancelHandle, Scheduler, Task};

/// Dropping a `RemoteHandle` aborts the remote future, so the handle must be
/// explicitly forgotten when the cancel handle is discarded unused.
struct SpawnHandle(Option<RemoteHandle<()>>);

impl SpawnHandle {
  fn cancel(&mut self) { self.0.take(); }
}

impl Drop for SpawnHandle {
  fn drop(&mut self) {
    if let Some(handle) = self.0.take() {
      handle.forget();
    }
  }
}

impl Scheduler for futures::executor::ThreadPool {
  fn schedule(&self, task: Task) -> CancelHandle {
    let handle = self
      .spawn_with_handle(async move { task.run() })
      .expect("spawn task to thread pool failed.");
    let guard = SpawnHandle(Some(handle));
    CancelHandle::new(move || {
      let mut guard = guard;
      guard.cancel();
    })
  }
}

#[cfg(test)]
mod test {
  use std::{sync::mpsc::channel, time::Duration};

  use super::*;

  #[test]
  fn pool_runs_scheduled_task() {
    let pool = futures::executor::ThreadPool::new().unwrap();
    let (tx, rx) = channel();
    pool.schedule(Task::new(move || {
      tx.send(42).unwrap();
    }));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
  }
}
