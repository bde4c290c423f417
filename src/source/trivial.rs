//! Sources that terminate straight away.

use std::{marker::PhantomData, sync::Arc};

use crate::{
  demand,
  error::Error,
  hooks,
  sink::Sink,
  source::Source,
  subscription::{Subscription, Upstream},
};

/// Subscription of an already-terminated source: demand is pointless and
/// cancellation moot.
pub(crate) struct NoopSub;

impl Subscription for NoopSub {
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      hooks::on_error_dropped(Error::InvalidRequest);
    }
  }

  fn cancel(&self) {}
}

/// A source that completes immediately without emitting.
pub fn empty<T>() -> EmptySource<T> { EmptySource(PhantomData) }

pub struct EmptySource<T>(PhantomData<T>);

impl<T> Source for EmptySource<T> {
  type Item = T;

  fn subscribe<S>(self, mut sink: S)
  where
    S: Sink<T> + Send + 'static,
  {
    sink.on_subscribe(Upstream::new(Arc::new(NoopSub)));
    sink.on_complete();
  }
}

/// A source that fails immediately with `err`.
pub fn throw<T>(err: Error) -> ThrowSource<T> { ThrowSource(err, PhantomData) }

pub struct ThrowSource<T>(Error, PhantomData<T>);

impl<T> Source for ThrowSource<T> {
  type Item = T;

  fn subscribe<S>(self, mut sink: S)
  where
    S: Sink<T> + Send + 'static,
  {
    sink.on_subscribe(Upstream::new(Arc::new(NoopSub)));
    sink.on_error(self.0);
  }
}
