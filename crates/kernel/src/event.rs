//! The time-ordered event queue.
//!
//! Events are deferred computations keyed by simulated time. The queue
//! clock only moves forward: enqueueing into the past is fatal, and a
//! drain dispatches due events in `(time, seq)` order, so events at equal
//! times run in enqueue order.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tracing::{error, trace};

use crate::point::Point;
use crate::specs::Specs;

/// A deferred computation parameterized by its dispatch point.
pub type EventAction = Box<dyn FnOnce(&Point)>;

struct Pending {
    time: f64,
    seq: u64,
    action: EventAction,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of pending events plus the queue clock.
pub struct EventQueue {
    heap: RefCell<BinaryHeap<Reverse<Pending>>>,
    busy: Cell<bool>,
    time: Cell<f64>,
    seq: Cell<u64>,
}

impl EventQueue {
    pub(crate) fn new(specs: &Specs) -> Self {
        Self {
            heap: RefCell::new(BinaryHeap::new()),
            busy: Cell::new(false),
            time: Cell::new(specs.start_time),
            seq: Cell::new(0),
        }
    }

    /// The queue clock: the time of the latest dispatched event.
    pub fn time(&self) -> f64 {
        self.time.get()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.heap.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.borrow().is_empty()
    }

    /// Schedule `action` at time `t`. Fatal when `t` lies behind the
    /// queue clock.
    pub fn enqueue(&self, t: f64, action: impl FnOnce(&Point) + 'static) {
        let clock = self.time.get();
        if t < clock {
            error!(t, clock, "event scheduled behind the queue clock");
            panic!("enqueue: time {t} precedes the queue clock {clock}");
        }
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.heap.borrow_mut().push(Reverse(Pending {
            time: t,
            seq,
            action: Box::new(action),
        }));
    }

    /// Dispatch every event due at `p` in `(time, seq)` order. Reentrant
    /// calls coalesce into the outer drain and return immediately. The
    /// drain stops early when the run records an abort.
    pub fn drain(&self, p: &Point, include_current: bool) {
        if self.busy.replace(true) {
            return;
        }
        let _guard = BusyGuard(&self.busy);
        loop {
            if p.run.aborted() {
                break;
            }
            let next = {
                let mut heap = self.heap.borrow_mut();
                let due = match heap.peek() {
                    Some(Reverse(pending)) => {
                        if include_current {
                            pending.time <= p.time
                        } else {
                            pending.time < p.time
                        }
                    }
                    None => false,
                };
                if due { heap.pop() } else { None }
            };
            let Some(Reverse(pending)) = next else {
                break;
            };
            if pending.time < self.time.get() {
                panic!(
                    "drain: event time {} is smaller than the queue clock {}",
                    pending.time,
                    self.time.get()
                );
            }
            self.time.set(pending.time);
            trace!(time = pending.time, seq = pending.seq, "dispatch");
            let dispatch = Point::dispatch(&p.run, pending.time);
            (pending.action)(&dispatch);
        }
    }

    /// Like [`EventQueue::drain`], but fatal when `p` lies behind the
    /// queue clock.
    pub fn drain_sync(&self, p: &Point, include_current: bool) {
        let clock = self.time.get();
        if p.time < clock {
            panic!("drain_sync: point time {} is behind the queue clock {clock}", p.time);
        }
        self.drain(p, include_current);
    }
}

struct BusyGuard<'a>(&'a Cell<bool>);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// How pending events are reconciled before an event-context computation
/// runs at a point produced by the dynamics layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventMode {
    /// Dispatch events scheduled up to and including the point's time;
    /// fatal when the queue clock is already past it.
    #[default]
    CurrentEvents,
    /// Dispatch events scheduled strictly before the point's time; fatal
    /// when the queue clock is already past it.
    EarlierEvents,
    /// As `CurrentEvents`, tolerating a queue clock past the point.
    CurrentEventsOrFromPast,
    /// As `EarlierEvents`, tolerating a queue clock past the point.
    EarlierEventsOrFromPast,
}

/// Bridge from the dynamics layer into the event context: reconcile the
/// queue under `mode`, then run `f` at `p`.
pub fn run_event<T>(p: &Point, mode: EventMode, f: impl FnOnce(&Point) -> T) -> T {
    let queue = &p.run.queue;
    match mode {
        EventMode::CurrentEvents => queue.drain_sync(p, true),
        EventMode::EarlierEvents => queue.drain_sync(p, false),
        EventMode::CurrentEventsOrFromPast => queue.drain(p, true),
        EventMode::EarlierEventsOrFromPast => queue.drain(p, false),
    }
    f(p)
}
