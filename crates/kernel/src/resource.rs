//! Counting semaphores with pluggable waiter ordering.
//!
//! A resource hands permits to processes. When no permit is available
//! the requester suspends in a waiter container ordered under the
//! resource's strategy; a release hands the permit straight to the next
//! waiter without touching the counter. A permit handed to a waiter that
//! was cancelled in flight is re-released, so permits are conserved.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::point::Point;
use crate::process::{Process, Suspension};
use crate::strategy::{Strategy, StrategyQueue};

struct Waiter {
    id: u64,
    wake: Rc<dyn Fn(&Point) -> bool>,
}

struct ResourceInner {
    strategy: Strategy,
    count: Cell<i64>,
    max_count: Option<i64>,
    waiters: RefCell<StrategyQueue<Waiter>>,
    next_waiter: Cell<u64>,
}

/// A counting semaphore. Clones share the same resource.
pub struct Resource {
    inner: Rc<ResourceInner>,
}

impl Clone for Resource {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Resource {
    /// A resource with `count` permits and the same maximum.
    pub fn new(strategy: Strategy, count: i64) -> Self {
        Self::with_max_count(strategy, count, Some(count))
    }

    /// A resource with an explicit maximum, or none.
    pub fn with_max_count(strategy: Strategy, count: i64, max_count: Option<i64>) -> Self {
        if count < 0 {
            panic!("Resource: negative permit count {count}");
        }
        if let Some(max) = max_count {
            if count > max {
                panic!("Resource: permit count {count} exceeds the maximum {max}");
            }
        }
        Self {
            inner: Rc::new(ResourceInner {
                strategy,
                count: Cell::new(count),
                max_count,
                waiters: RefCell::new(StrategyQueue::new(strategy)),
                next_waiter: Cell::new(0),
            }),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.strategy
    }

    /// Permits currently available.
    pub fn count(&self) -> i64 {
        self.inner.count.get()
    }

    pub fn max_count(&self) -> Option<i64> {
        self.inner.max_count
    }

    /// Processes currently suspended on this resource.
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Acquire one permit, suspending while none is available.
    pub fn request(&self) -> Process<()> {
        self.request_impl(None)
    }

    /// Acquire one permit under a waiter priority (smaller is earlier).
    /// Requires the `StaticPriorities` strategy.
    pub fn request_with_priority(&self, priority: f64) -> Process<()> {
        self.request_impl(Some(priority))
    }

    fn request_impl(&self, priority: Option<f64>) -> Process<()> {
        let resource = self.clone();
        Process::new(move |_p, params| {
            let inner = &resource.inner;
            if inner.count.get() > 0 {
                inner.count.set(inner.count.get() - 1);
                trace!(count = inner.count.get(), "resource acquired");
                params.resume(_p, ());
                return;
            }
            let pid = params.pid().clone();
            let slot = Suspension::park(params);
            let id = inner.next_waiter.get();
            inner.next_waiter.set(id + 1);
            let sub = pid.cancel_signal().subscribe({
                let resource = resource.clone();
                let slot = slot.clone();
                move |p2, _| {
                    resource.inner.waiters.borrow_mut().retain(|w| w.id != id);
                    slot.cancel(p2);
                }
            });
            slot.attach(sub);
            let wake: Rc<dyn Fn(&Point) -> bool> = Rc::new({
                let slot = slot.clone();
                move |p2: &Point| slot.wake(p2, ())
            });
            let waiter = Waiter { id, wake };
            let mut waiters = inner.waiters.borrow_mut();
            match priority {
                Some(priority) => waiters.push_with_priority(priority, waiter),
                None => waiters.push(waiter),
            }
            trace!(waiters = waiters.len(), "resource wait");
        })
    }

    /// Release one permit in the event context: hand it to the next
    /// waiter under the strategy, or bank it. Fatal past the maximum.
    pub fn release(&self, p: &Point) {
        let next = {
            let mut rng = p.run.rng.borrow_mut();
            self.inner.waiters.borrow_mut().pop(&mut rng)
        };
        match next {
            Some(waiter) => {
                let resource = self.clone();
                p.run.queue.enqueue(p.time, move |p2| {
                    // The waiter may have been cancelled after the
                    // hand-off; recover the permit in that case.
                    if !(waiter.wake)(p2) {
                        resource.release(p2);
                    }
                });
            }
            None => {
                let count = self.inner.count.get() + 1;
                if let Some(max) = self.inner.max_count {
                    if count > max {
                        panic!("release: permit count {count} exceeds the maximum {max}");
                    }
                }
                self.inner.count.set(count);
                trace!(count, "resource released");
            }
        }
    }

    /// Take a permit without suspending; event context.
    pub fn try_request(&self) -> bool {
        if self.inner.count.get() > 0 {
            self.inner.count.set(self.inner.count.get() - 1);
            true
        } else {
            false
        }
    }

    /// Dispatch events due at `p`, then take a permit without
    /// suspending.
    pub fn try_request_from_dynamics(&self, p: &Point) -> bool {
        crate::event::run_event(p, crate::event::EventMode::CurrentEventsOrFromPast, |_| {
            self.try_request()
        })
    }
}
