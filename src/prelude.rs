//! Everything needed to compose and subscribe sources.

pub use crate::{
  demand::{self, UNBOUNDED},
  error::Error,
  fusion::{FusedQueue, FusionMode},
  ops::{AllOp, DropOp, MulticastSource, PublishOp, SubscribeOnOp},
  queue::{Queue, QueueFactory},
  scheduler::{CancelHandle, ManualScheduler, Scheduler, Task, ThreadScheduler},
  sink::Sink,
  source::{self, Source},
  subscription::{Subscription, Upstream},
};
