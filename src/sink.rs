//! The consumer side of the protocol.

use crate::{error::Error, subscription::Upstream};

/// Receiver of one stream of signals.
///
/// A well-behaved source calls `on_subscribe` exactly once and first, then
/// zero or more `on_next`, then at most one of `on_complete`/`on_error`, and
/// nothing afterwards. Calls are serialized per sink (never overlapping),
/// though not necessarily from a single thread; operators that fan out use
/// their drain loop to provide that serialization.
pub trait Sink<T> {
  /// First signal: the demand channel (and possibly a fused queue).
  fn on_subscribe(&mut self, upstream: Upstream<T>);

  /// One item, covered by previously requested demand.
  fn on_next(&mut self, item: T);

  /// Terminal failure. No further signals follow.
  fn on_error(&mut self, err: Error);

  /// Terminal success. No further signals follow.
  fn on_complete(&mut self);
}
