//! The error half of the signal alphabet.
//!
//! Every `on_error` carries an [`Error`]. The enum is `Clone` because the
//! publish multicaster broadcasts one terminal error to every subscriber, and
//! `PartialEq` so tests can assert on the exact terminal a sink received.

/// Terminal error delivered through `Sink::on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  /// `request` was called with zero demand, which the protocol forbids.
  #[error("request amount must be positive")]
  InvalidRequest,

  /// The bounded prefetch queue rejected an item; the upstream produced more
  /// than it was asked for.
  #[error("prefetch queue overflow")]
  QueueOverflow,

  /// A user-supplied callback failed.
  #[error("{0}")]
  Callback(String),
}

impl Error {
  /// Wrap a callback failure.
  pub fn callback(msg: impl Into<String>) -> Self { Error::Callback(msg.into()) }
}
