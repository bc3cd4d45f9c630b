//! Publish-subscribe signals inside the event context.
//!
//! A [`SignalSource`] owns an insertion-ordered handler registry; the
//! [`Signal`] it hands out is the subscribable side. Triggering invokes
//! the handlers subscribed at trigger start, in subscription order;
//! handlers subscribed while a trigger runs are only seen by the next
//! trigger.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::point::Point;

type Handler<T> = Rc<dyn Fn(&Point, &T)>;

struct Registry<T> {
    handlers: RefCell<IndexMap<u64, Handler<T>>>,
    next_id: Cell<u64>,
}

impl<T: 'static> Registry<T> {
    fn subscribe(this: &Rc<Self>, handler: Handler<T>) -> Subscription {
        let id = this.next_id.get();
        this.next_id.set(id + 1);
        this.handlers.borrow_mut().insert(id, handler);
        let registry = Rc::downgrade(this);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.handlers.borrow_mut().shift_remove(&id);
            }
        })
    }
}

/// Owner side of a signal: keeps the handler registry and triggers it.
pub struct SignalSource<T> {
    registry: Rc<Registry<T>>,
}

impl<T> Clone for SignalSource<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Rc::clone(&self.registry),
        }
    }
}

impl<T: 'static> Default for SignalSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SignalSource<T> {
    pub fn new() -> Self {
        Self {
            registry: Rc::new(Registry {
                handlers: RefCell::new(IndexMap::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    /// The subscribable side of this source.
    pub fn signal(&self) -> Signal<T> {
        let registry = Rc::clone(&self.registry);
        Signal {
            connect: Rc::new(move |handler| Registry::subscribe(&registry, handler)),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&Point, &T) + 'static) -> Subscription {
        Registry::subscribe(&self.registry, Rc::new(handler))
    }

    /// Invoke every currently subscribed handler in subscription order.
    pub fn trigger(&self, p: &Point, value: &T) {
        let snapshot: Vec<Handler<T>> = self.registry.handlers.borrow().values().cloned().collect();
        for handler in snapshot {
            handler(p, value);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.registry.handlers.borrow().len()
    }
}

/// Subscribable side of a signal.
pub struct Signal<T> {
    connect: Rc<dyn Fn(Handler<T>) -> Subscription>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            connect: Rc::clone(&self.connect),
        }
    }
}

impl<T: 'static> Signal<T> {
    /// Register a handler; dispose the returned handle to unregister.
    pub fn subscribe(&self, handler: impl Fn(&Point, &T) + 'static) -> Subscription {
        (self.connect)(Rc::new(handler))
    }

    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Signal<U> {
        let connect = Rc::clone(&self.connect);
        let f = Rc::new(f);
        Signal {
            connect: Rc::new(move |handler: Handler<U>| {
                let f = Rc::clone(&f);
                connect(Rc::new(move |p, value| handler(p, &f(value))))
            }),
        }
    }

    pub fn filter(&self, pred: impl Fn(&T) -> bool + 'static) -> Signal<T> {
        let connect = Rc::clone(&self.connect);
        let pred = Rc::new(pred);
        Signal {
            connect: Rc::new(move |handler: Handler<T>| {
                let pred = Rc::clone(&pred);
                connect(Rc::new(move |p, value| {
                    if pred(value) {
                        handler(p, value);
                    }
                }))
            }),
        }
    }

    /// A signal firing whenever either input fires.
    pub fn merge(a: &Signal<T>, b: &Signal<T>) -> Signal<T> {
        let ca = Rc::clone(&a.connect);
        let cb = Rc::clone(&b.connect);
        Signal {
            connect: Rc::new(move |handler: Handler<T>| {
                Subscription::merge(ca(Rc::clone(&handler)), cb(handler))
            }),
        }
    }

    /// Drop the payload, keeping only the firing instants.
    pub fn void(&self) -> Signal<()> {
        self.map(|_| ())
    }
}

/// Handle returned by a subscription; disposing it unregisters the
/// handler. Dropping the handle leaves the handler registered.
pub struct Subscription(Option<Box<dyn FnOnce()>>);

impl Subscription {
    fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A subscription that does nothing when disposed.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Merge two subscriptions into one that disposes both.
    pub fn merge(a: Subscription, b: Subscription) -> Subscription {
        Subscription::new(move || {
            a.dispose();
            b.dispose();
        })
    }

    /// Unregister the handler.
    pub fn dispose(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
