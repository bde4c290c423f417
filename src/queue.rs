//! Bounded queues consumed by the publish multicaster.
//!
//! The multicaster only needs a thread-safe `offer` and single-consumer
//! `poll`/`is_empty`/`clear`; `offer` answers `false` on overflow, which the
//! multicaster treats as a broken protocol (the upstream produced more than
//! it was asked for). The default factory is backed by
//! `crossbeam_queue::ArrayQueue`.

use std::sync::Arc;

/// Minimal bounded-queue surface.
pub trait Queue<T>: Send + Sync {
  /// Enqueue; `false` means the queue is full.
  fn offer(&self, item: T) -> bool;

  /// Dequeue; `None` means empty. Single consumer.
  fn poll(&self) -> Option<T>;

  fn is_empty(&self) -> bool;

  /// Drop everything still buffered.
  fn clear(&self);
}

impl<T: Send> Queue<T> for crossbeam_queue::ArrayQueue<T> {
  fn offer(&self, item: T) -> bool { self.push(item).is_ok() }

  fn poll(&self) -> Option<T> { self.pop() }

  fn is_empty(&self) -> bool { crossbeam_queue::ArrayQueue::is_empty(self) }

  fn clear(&self) { while self.pop().is_some() {} }
}

/// Factory handed to the multicaster; invoked once per connection with the
/// prefetch capacity.
pub type QueueFactory<T> = Box<dyn Fn(usize) -> Arc<dyn Queue<T>> + Send + Sync>;

/// The default `ArrayQueue`-backed factory.
pub fn default_factory<T: Send + 'static>() -> QueueFactory<T> {
  Box::new(|capacity| Arc::new(crossbeam_queue::ArrayQueue::new(capacity)) as Arc<dyn Queue<T>>)
}
