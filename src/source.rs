//! The producer side of the protocol, and the operator entry points.

use crate::{
  error::Error,
  ops::{all::AllOp, drop::DropOp, publish::PublishOp, subscribe_on::SubscribeOnOp},
  queue::{self, QueueFactory},
  scheduler::Scheduler,
  sink::Sink,
};

pub mod from_iter;
pub mod trivial;

pub use from_iter::{from_iter, IterSource};
pub use trivial::{empty, throw, EmptySource, ThrowSource};

fn noop_drop<T>(_: T) -> Result<(), Error> { Ok(()) }

/// Producer of a demand-regulated stream.
///
/// `subscribe` is the only entry point; everything else layers an operator
/// between `self` and the eventual sink. Sources are single-use: each
/// operator object is consumed by its subscription and terminates with it.
pub trait Source {
  type Item;

  /// Attach `sink` and start the protocol. Implementations must deliver
  /// `on_subscribe` before any other signal.
  fn subscribe<S>(self, sink: S)
  where
    S: Sink<Self::Item> + Send + 'static,
    Self: Sized;

  /// Relieve backpressure by silently discarding items the downstream has
  /// not requested.
  fn on_backpressure_drop(self) -> DropOp<Self, fn(Self::Item) -> Result<(), Error>>
  where
    Self: Sized,
  {
    DropOp::new(self, noop_drop::<Self::Item> as fn(Self::Item) -> Result<(), Error>)
  }

  /// Like [`on_backpressure_drop`](Source::on_backpressure_drop), but hand
  /// every discarded item to `on_drop`. An `Err` from the callback cancels
  /// the upstream and fails the downstream.
  fn on_backpressure_drop_with<F>(self, on_drop: F) -> DropOp<Self, F>
  where
    Self: Sized,
    F: FnMut(Self::Item) -> Result<(), Error>,
  {
    DropOp::new(self, on_drop)
  }

  /// Move the upstream `subscribe` call onto `scheduler`. See
  /// [`SubscribeOnOp::eager_cancel`] and [`SubscribeOnOp::request_on`] for
  /// the boundary's two toggles.
  fn subscribe_on<SD>(self, scheduler: SD) -> SubscribeOnOp<Self, SD>
  where
    Self: Sized,
    SD: Scheduler + 'static,
  {
    SubscribeOnOp::new(self, scheduler)
  }

  /// Share this source among every subscriber `transform` attaches to the
  /// [`MulticastSource`](crate::ops::publish::MulticastSource) it receives,
  /// buffering at most `prefetch` items and pacing the upstream to the
  /// slowest subscriber.
  ///
  /// # Panics
  ///
  /// Panics if `prefetch` is zero.
  fn publish<F>(self, prefetch: usize, transform: F) -> PublishOp<Self, F>
  where
    Self: Sized,
    Self::Item: Send + 'static,
  {
    PublishOp::new(self, prefetch, queue::default_factory::<Self::Item>(), transform)
  }

  /// [`publish`](Source::publish) with a caller-supplied prefetch-queue
  /// factory.
  ///
  /// # Panics
  ///
  /// Panics if `prefetch` is zero.
  fn publish_with<F>(
    self,
    prefetch: usize,
    queue_factory: QueueFactory<Self::Item>,
    transform: F,
  ) -> PublishOp<Self, F>
  where
    Self: Sized,
  {
    PublishOp::new(self, prefetch, queue_factory, transform)
  }

  /// Emit a single `true` if every item matches `predicate`,
  /// short-circuiting to `false` (and cancelling the upstream) on the first
  /// mismatch.
  fn all<P>(self, predicate: P) -> AllOp<Self, P>
  where
    Self: Sized,
    P: FnMut(&Self::Item) -> Result<bool, Error>,
  {
    AllOp::new(self, predicate)
  }
}
