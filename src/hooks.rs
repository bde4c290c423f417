//! Process-wide handlers for signals that arrive after a terminal state.
//!
//! The protocol forbids delivering anything past `on_complete`/`on_error`, so
//! stray signals are diverted here instead of being raised as live signals.
//! By default they are logged; tests (or embedders) may install their own
//! handlers, in the same spirit as `log::set_boxed_logger`.

use std::{any::Any, sync::LazyLock};

use parking_lot::RwLock;

use crate::error::Error;

type NextHandler = Box<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(Error) + Send + Sync>;

#[derive(Default)]
struct Handlers {
  next_dropped: Option<NextHandler>,
  error_dropped: Option<ErrorHandler>,
}

static HOOKS: LazyLock<RwLock<Handlers>> = LazyLock::new(|| RwLock::new(Handlers::default()));

/// Divert an item that arrived after the terminal signal.
pub fn on_next_dropped<T: Send + 'static>(item: T) {
  let hooks = HOOKS.read();
  match &hooks.next_dropped {
    Some(h) => h(Box::new(item)),
    None => tracing::debug!("item dropped after terminal signal"),
  }
}

/// Divert an error that arrived after the terminal signal, or a protocol
/// violation that must not be raised as a live signal.
pub fn on_error_dropped(err: Error) {
  let hooks = HOOKS.read();
  match &hooks.error_dropped {
    Some(h) => h(err),
    None => tracing::warn!(%err, "error dropped after terminal signal"),
  }
}

/// Install a handler for dropped items. The item is boxed as `dyn Any`
/// because drops happen below the operators' generic surface.
pub fn set_next_dropped(h: impl Fn(Box<dyn Any + Send>) + Send + Sync + 'static) {
  HOOKS.write().next_dropped = Some(Box::new(h));
}

/// Install a handler for dropped errors.
pub fn set_error_dropped(h: impl Fn(Error) + Send + Sync + 'static) {
  HOOKS.write().error_dropped = Some(Box::new(h));
}

/// Restore the default (logging) handlers.
pub fn reset() {
  let mut hooks = HOOKS.write();
  hooks.next_dropped = None;
  hooks.error_dropped = None;
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::testing;

  #[test]
  fn installed_handler_receives_item_and_error() {
    let cap = testing::capture_dropped();
    on_next_dropped(41_i32);
    on_error_dropped(Error::QueueOverflow);
    assert_eq!(cap.items::<i32>(), vec![41]);
    assert_eq!(cap.errors(), vec![Error::QueueOverflow]);
  }

  #[test]
  fn default_handlers_do_not_panic() {
    let _cap = testing::capture_dropped();
    reset();
    on_next_dropped("stray");
    on_error_dropped(Error::InvalidRequest);
  }
}
