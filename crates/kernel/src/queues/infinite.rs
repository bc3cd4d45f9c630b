//! Unbounded queues with wait-time statistics.
//!
//! Items are stored under one strategy while blocked dequeuers wait on
//! an output resource ordered under another. Dequeueing is a two-phase
//! protocol - announce the request, wait for an item, extract - which
//! keeps two distinct statistics: how long a request waited and how long
//! an item sat in the store.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::point::Point;
use crate::process::Process;
use crate::resource::Resource;
use crate::signal::{Signal, SignalSource};
use crate::stats::SamplingStats;
use crate::strategy::{Strategy, StrategyQueue};

struct Stored<T> {
    item: T,
    stored_at: f64,
}

struct QueueInner<T> {
    store: RefCell<StrategyQueue<Stored<T>>>,
    output: Resource,
    store_count: Cell<u64>,
    output_count: Cell<u64>,
    wait_stats: RefCell<SamplingStats>,
    output_wait_stats: RefCell<SamplingStats>,
    enqueue_stored: SignalSource<T>,
    dequeue_requested: SignalSource<()>,
    dequeue_extracted: SignalSource<T>,
}

/// An unbounded queue. Clones share the queue.
pub struct Queue<T> {
    inner: Rc<QueueInner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Queue<T> {
    /// A queue storing items under `storing` and ordering blocked
    /// dequeuers under `output`.
    pub fn new(storing: Strategy, output: Strategy) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                store: RefCell::new(StrategyQueue::new(storing)),
                output: Resource::with_max_count(output, 0, None),
                store_count: Cell::new(0),
                output_count: Cell::new(0),
                wait_stats: RefCell::new(SamplingStats::new()),
                output_wait_stats: RefCell::new(SamplingStats::new()),
                enqueue_stored: SignalSource::new(),
                dequeue_requested: SignalSource::new(),
                dequeue_extracted: SignalSource::new(),
            }),
        }
    }

    /// First come, first served on both sides.
    pub fn fcfs() -> Self {
        Self::new(Strategy::Fcfs, Strategy::Fcfs)
    }

    /// Items currently stored.
    pub fn len(&self) -> usize {
        self.inner.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items ever stored.
    pub fn store_count(&self) -> u64 {
        self.inner.store_count.get()
    }

    /// Total items ever extracted.
    pub fn output_count(&self) -> u64 {
        self.inner.output_count.get()
    }

    /// Time items spent stored before extraction.
    pub fn wait_stats(&self) -> SamplingStats {
        *self.inner.wait_stats.borrow()
    }

    /// Time dequeue requests waited for an item.
    pub fn output_wait_stats(&self) -> SamplingStats {
        *self.inner.output_wait_stats.borrow()
    }

    /// Fires after an item lands in the store.
    pub fn enqueue_stored(&self) -> Signal<T> {
        self.inner.enqueue_stored.signal()
    }

    /// Fires when a dequeue request is announced.
    pub fn dequeue_requested(&self) -> Signal<()> {
        self.inner.dequeue_requested.signal()
    }

    /// Fires after an item leaves the store.
    pub fn dequeue_extracted(&self) -> Signal<T> {
        self.inner.dequeue_extracted.signal()
    }

    /// Store an item in the event context; wakes one blocked dequeuer.
    pub fn enqueue(&self, p: &Point, item: T) {
        self.store_item(p, None, item);
    }

    /// Store with a priority; requires a `StaticPriorities` storing
    /// strategy.
    pub fn enqueue_with_priority(&self, p: &Point, priority: f64, item: T) {
        self.store_item(p, Some(priority), item);
    }

    fn store_item(&self, p: &Point, priority: Option<f64>, item: T) {
        let stored = Stored {
            item: item.clone(),
            stored_at: p.time,
        };
        {
            let mut store = self.inner.store.borrow_mut();
            match priority {
                Some(priority) => store.push_with_priority(priority, stored),
                None => store.push(stored),
            }
        }
        self.inner.store_count.set(self.inner.store_count.get() + 1);
        self.inner.output.release(p);
        trace!(len = self.len(), "queue stored");
        self.inner.enqueue_stored.trigger(p, &item);
    }

    /// Remove the next item under the storing strategy, suspending while
    /// the queue is empty.
    pub fn dequeue(&self) -> Process<T> {
        let queue = self.clone();
        let after_request = self.clone();
        Process::from_event(move |p| queue.begin_dequeue(p)).and_then(move |requested_at| {
            let output = after_request.inner.output.clone();
            let extract_from = after_request.clone();
            output.request().and_then(move |()| {
                Process::from_event(move |p| extract_from.extract(p, requested_at))
            })
        })
    }

    /// Remove without suspending. Event context.
    pub fn try_dequeue(&self, p: &Point) -> Option<T> {
        if self.inner.output.try_request() {
            let requested_at = self.begin_dequeue(p);
            Some(self.extract(p, requested_at))
        } else {
            None
        }
    }

    fn begin_dequeue(&self, p: &Point) -> f64 {
        self.inner.dequeue_requested.trigger(p, &());
        p.time
    }

    fn extract(&self, p: &Point, requested_at: f64) -> T {
        let stored = {
            let mut rng = p.run.rng.borrow_mut();
            self.inner.store.borrow_mut().pop(&mut rng)
        };
        let Some(Stored { item, stored_at }) = stored else {
            panic!("dequeue: output permit granted with an empty store");
        };
        self.inner.output_count.set(self.inner.output_count.get() + 1);
        self.inner.wait_stats.borrow_mut().add(p.time - stored_at);
        self.inner
            .output_wait_stats
            .borrow_mut()
            .add(p.time - requested_at);
        trace!(len = self.len(), "queue extracted");
        self.inner.dequeue_extracted.trigger(p, &item);
        item
    }
}
