//! Backpressure-aware reactive-streams operator core.
//!
//! A [`Source`] pushes items to a [`Sink`], but only as many as the sink has
//! asked for through its [`Subscription`]: the sink calls `request(n)` to pull
//! credit, the source answers with at most `n` `on_next` calls, then exactly
//! one of `on_complete` or `on_error`, and nothing after that. Operators sit
//! between the two, subscribing upstream and presenting themselves as a
//! source downstream while enforcing the protocol on both edges.
//!
//! The operators shipped here are the backpressure-relief
//! [`on_backpressure_drop`](Source::on_backpressure_drop), the scheduler
//! boundary [`subscribe_on`](Source::subscribe_on), the one-to-many
//! [`publish`](Source::publish) multicaster and the short-circuiting
//! [`all`](Source::all). Adjacent operators can additionally negotiate
//! queue *fusion* (see [`fusion`]) to skip per-item dispatch.
//!
//! ```
//! use rxcore::prelude::*;
//!
//! let (sink, probe) = rxcore::testing::probe::<i32>(10);
//! source::from_iter(1..=3).subscribe(sink);
//! assert_eq!(probe.items(), vec![1, 2, 3]);
//! assert!(probe.completed());
//! ```

pub mod demand;
pub mod deferred;
pub mod error;
pub mod fusion;
pub mod hooks;
pub mod ops;
pub mod queue;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod subscription;
pub mod testing;

pub mod prelude;

pub use crate::{
  error::Error,
  sink::Sink,
  source::Source,
  subscription::{Subscription, Upstream},
};
