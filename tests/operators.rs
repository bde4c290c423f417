//! End-to-end operator scenarios.
//!
//! Each test drives a whole operator chain through the public surface and
//! asserts on the exact signal sequences the sinks observe.

use std::{sync::Arc, thread, time::Duration};

use parking_lot::Mutex;
use rxcore::{
  prelude::*,
  testing::{self, Signal},
};

// ---- on_backpressure_drop --------------------------------------------------

#[test]
fn drop_starved_downstream_splits_items_between_sink_and_callback() {
  let dropped = Arc::new(Mutex::new(vec![]));
  let c_dropped = dropped.clone();
  let (sink, probe) = testing::probe::<i32>(3);

  source::from_iter(1..=10)
    .on_backpressure_drop_with(move |v| {
      c_dropped.lock().push(v);
      Ok(())
    })
    .subscribe(sink);

  assert_eq!(probe.items(), vec![1, 2, 3]);
  assert_eq!(*dropped.lock(), vec![4, 5, 6, 7, 8, 9, 10]);
  // Completion arrives after the last drop, exactly once.
  assert_eq!(probe.signals().last(), Some(&Signal::Complete));
  assert_eq!(
    probe.signals().iter().filter(|s| matches!(s, Signal::Complete)).count(),
    1
  );
}

#[test]
fn drop_callback_failure_cancels_upstream_and_fails_downstream() {
  let cap = testing::capture_dropped();
  let (sink, probe) = testing::probe::<i32>(0);

  // The source ignores cancellation, so item 3 still arrives after the
  // operator has terminated; its drop also fails and is diverted.
  testing::emit_all(vec![1, 2, 3])
    .on_backpressure_drop_with(|v| {
      if v >= 2 {
        Err(Error::callback("boom"))
      } else {
        Ok(())
      }
    })
    .subscribe(sink);

  assert!(probe.items().is_empty());
  assert_eq!(probe.error(), Some(Error::callback("boom")));
  assert_eq!(cap.errors(), vec![Error::callback("boom")]);
}

#[test]
fn drop_pass_through_round_trip_with_sufficient_demand() {
  let dropped = Arc::new(Mutex::new(vec![]));
  let c_dropped = dropped.clone();
  let (sink, probe) = testing::probe::<i32>(UNBOUNDED);

  source::from_iter(1..=100)
    .on_backpressure_drop_with(move |v| {
      c_dropped.lock().push(v);
      Ok(())
    })
    .subscribe(sink);

  assert_eq!(probe.items(), (1..=100).collect::<Vec<_>>());
  assert!(probe.completed());
  assert!(dropped.lock().is_empty());
}

// ---- publish ----------------------------------------------------------------

#[test]
fn publish_two_subscribers_equal_pace_with_bounded_upstream_demand() {
  let requests = Arc::new(Mutex::new(vec![]));
  let (sink_a, probe_a) = testing::probe::<i32>(5);
  let (sink_b, probe_b) = testing::probe::<i32>(5);

  testing::hide(source::from_iter(1..=5), requests.clone())
    .publish(4, move |ms: MulticastSource<i32>| {
      ms.clone().subscribe(sink_b);
      ms
    })
    .subscribe(sink_a);

  assert_eq!(probe_a.items(), vec![1, 2, 3, 4, 5]);
  assert_eq!(probe_b.items(), vec![1, 2, 3, 4, 5]);
  assert!(probe_a.completed() && probe_b.completed());
  // Prefetch 4 up front, a single refill of limit = 3 once three items have
  // been forwarded to everyone; never more outstanding than that.
  assert_eq!(*requests.lock(), vec![4, 3]);
}

#[test]
fn publish_slow_subscriber_throttles_fast_one_until_it_leaves() {
  let (sink_a, probe_a) = testing::probe::<i32>(UNBOUNDED);
  let (sink_b, probe_b) = testing::probe::<i32>(2);

  source::from_iter(1..=10)
    .publish(4, move |ms: MulticastSource<i32>| {
      ms.clone().subscribe(sink_b);
      ms
    })
    .subscribe(sink_a);

  // The multicast guarantee is strict: A never gets an item B has not
  // requested, so both stop at two.
  assert_eq!(probe_a.items(), vec![1, 2]);
  assert_eq!(probe_b.items(), vec![1, 2]);
  assert!(!probe_a.terminated());

  probe_b.cancel();
  assert_eq!(probe_a.items(), (1..=10).collect::<Vec<_>>());
  assert!(probe_a.completed());
  // The cancelled subscriber saw no terminal.
  assert_eq!(probe_b.signals(), vec![Signal::Subscribed, Signal::Next(1), Signal::Next(2)]);
}

#[test]
fn publish_late_joiner_after_terminal_sees_only_the_terminal() {
  let shared: Arc<Mutex<Option<MulticastSource<i32>>>> = Arc::new(Mutex::new(None));
  let c_shared = shared.clone();
  let (sink_a, probe_a) = testing::probe::<i32>(UNBOUNDED);

  source::from_iter(1..=3)
    .publish(4, move |ms: MulticastSource<i32>| {
      *c_shared.lock() = Some(ms.clone());
      ms
    })
    .subscribe(sink_a);
  assert!(probe_a.completed());

  let (sink_late, probe_late) = testing::probe::<i32>(UNBOUNDED);
  shared.lock().take().unwrap().subscribe(sink_late);
  assert_eq!(probe_late.signals(), vec![Signal::Subscribed, Signal::Complete]);
}

#[test]
fn publish_delivers_each_item_to_every_subscriber_present_at_poll() {
  // A joins before the first item, C joins mid-stream (while everyone is
  // stalled on B's missing demand), so C must not see items polled before
  // its join but must see everything after.
  let shared: Arc<Mutex<Option<MulticastSource<i32>>>> = Arc::new(Mutex::new(None));
  let c_shared = shared.clone();
  let (sink_a, probe_a) = testing::probe::<i32>(UNBOUNDED);
  let (sink_b, probe_b) = testing::probe::<i32>(2);

  source::from_iter(1..=6)
    .publish(4, move |ms: MulticastSource<i32>| {
      *c_shared.lock() = Some(ms.clone());
      ms.clone().subscribe(sink_b);
      ms
    })
    .subscribe(sink_a);

  assert_eq!(probe_a.items(), vec![1, 2]);

  let (sink_c, probe_c) = testing::probe::<i32>(UNBOUNDED);
  shared.lock().take().unwrap().subscribe(sink_c);
  // C's unbounded demand does not unstick anyone: B still owes demand.
  assert!(probe_c.items().is_empty());

  probe_b.request(UNBOUNDED);
  assert_eq!(probe_a.items(), (1..=6).collect::<Vec<_>>());
  assert_eq!(probe_b.items(), (1..=6).collect::<Vec<_>>());
  // C joined strictly after 1 and 2 were polled and broadcast.
  assert_eq!(probe_c.items(), vec![3, 4, 5, 6]);
  assert!(probe_a.completed() && probe_b.completed() && probe_c.completed());
}

// ---- subscribe_on -----------------------------------------------------------

#[test]
fn subscribe_on_eager_cancel_before_dispatch_reaches_nothing() {
  let sched = ManualScheduler::new();
  let (sink, probe) = testing::probe::<i32>(UNBOUNDED);

  source::from_iter(1..=3)
    .subscribe_on(sched.clone())
    .eager_cancel(true)
    .subscribe(sink);

  probe.cancel();
  // The scheduler's cancel handle ran exactly once, the queued subscribe
  // never did, and the sink saw nothing beyond its own on_subscribe.
  assert_eq!(sched.cancellations(), 1);
  assert_eq!(sched.run_all(), 0);
  assert_eq!(probe.signals(), vec![Signal::Subscribed]);
}

#[test]
fn subscribe_on_moves_the_whole_chain_off_the_caller() {
  let (sink, probe) = testing::probe::<i32>(UNBOUNDED);
  let dropped = Arc::new(Mutex::new(vec![]));
  let c_dropped = dropped.clone();

  source::from_iter(1..=6)
    .on_backpressure_drop_with(move |v| {
      c_dropped.lock().push(v);
      Ok(())
    })
    .subscribe_on(ThreadScheduler)
    .subscribe(sink);

  for _ in 0..100 {
    if probe.terminated() {
      break;
    }
    thread::sleep(Duration::from_millis(10));
  }
  assert_eq!(probe.items(), vec![1, 2, 3, 4, 5, 6]);
  assert!(probe.completed());
  assert!(dropped.lock().is_empty());
}

#[test]
fn subscribe_on_classic_demand_flows_through_the_scheduler() {
  let sched = ManualScheduler::new();
  let (sink, probe) = testing::probe::<i32>(0);

  source::from_iter(1..=4)
    .subscribe_on(sched.clone())
    .eager_cancel(true)
    .request_on(true)
    .subscribe(sink);

  sched.run_all();
  probe.request(3);
  assert!(probe.items().is_empty());
  sched.run_all();
  assert_eq!(probe.items(), vec![1, 2, 3]);
}

// ---- all --------------------------------------------------------------------

#[test]
fn all_is_a_boolean_source_with_deferred_delivery() {
  let (sink, probe) = testing::probe::<bool>(0);
  source::from_iter(1..=4).all(|v| Ok(*v < 10)).subscribe(sink);

  // The verdict exists but waits for demand.
  assert!(probe.items().is_empty());
  probe.request(1);
  assert_eq!(probe.signals(), vec![Signal::Subscribed, Signal::Next(true), Signal::Complete]);
}

// ---- protocol invariants ----------------------------------------------------

#[test]
fn every_sink_observes_subscribe_first_and_one_terminal() {
  let (sink_a, probe_a) = testing::probe::<i32>(2);
  source::from_iter(1..=8).on_backpressure_drop().subscribe(sink_a);

  let signals = probe_a.signals();
  assert_eq!(signals.first(), Some(&Signal::Subscribed));
  let terminals = signals
    .iter()
    .filter(|s| matches!(s, Signal::Complete | Signal::Error(_)))
    .count();
  assert_eq!(terminals, 1);
  // Nothing after the terminal.
  let last_is_terminal = matches!(signals.last(), Some(Signal::Complete | Signal::Error(_)));
  assert!(last_is_terminal);
}

#[test]
fn publish_serializes_demand_arriving_from_other_threads() {
  let (sink, probe) = testing::probe::<i32>(0);
  source::from_iter(1..=100).publish(8, |ms| ms).subscribe(sink);

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let probe = probe.clone();
      thread::spawn(move || {
        for _ in 0..25 {
          probe.request(1);
        }
      })
    })
    .collect();
  for h in handles {
    h.join().unwrap();
  }

  // 100 units of demand from four threads; the drain serialized them into
  // the source order with nothing skipped or duplicated.
  assert_eq!(probe.items(), (1..=100).collect::<Vec<_>>());
  assert!(probe.completed());
}

#[test]
fn publish_chain_composes_with_drop() {
  // publish feeds a drop stage; the drop stage's unbounded upstream request
  // is capped by the multicaster's own prefetch pacing.
  let dropped = Arc::new(Mutex::new(vec![]));
  let c_dropped = dropped.clone();
  let (sink, probe) = testing::probe::<i32>(2);

  source::from_iter(1..=6)
    .publish(4, move |ms: MulticastSource<i32>| {
      ms.on_backpressure_drop_with(move |v| {
        c_dropped.lock().push(v);
        Ok(())
      })
    })
    .subscribe(sink);

  assert_eq!(probe.items(), vec![1, 2]);
  assert_eq!(*dropped.lock(), vec![3, 4, 5, 6]);
  assert!(probe.completed());
}
