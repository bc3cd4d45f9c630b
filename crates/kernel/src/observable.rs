//! Readable values paired with change signals.

use std::cell::RefCell;
use std::rc::Rc;

use crate::point::Point;
use crate::signal::{Signal, SignalSource};

/// A readable value whose changes are announced on a signal. Derived
/// observables change whenever any upstream observable changes.
pub struct Observable<T> {
    read: Rc<dyn Fn(&Point) -> T>,
    changed: Signal<()>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            read: Rc::clone(&self.read),
            changed: self.changed.clone(),
        }
    }
}

impl<T: 'static> Observable<T> {
    pub fn new(read: impl Fn(&Point) -> T + 'static, changed: Signal<()>) -> Self {
        Self {
            read: Rc::new(read),
            changed,
        }
    }

    /// The current value; event context.
    pub fn read(&self, p: &Point) -> T {
        (self.read)(p)
    }

    /// Fires after every change of the observed value.
    pub fn changed(&self) -> Signal<()> {
        self.changed.clone()
    }

    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<U> {
        let read = Rc::clone(&self.read);
        Observable {
            read: Rc::new(move |p| f(read(p))),
            changed: self.changed.clone(),
        }
    }

    /// Combine two observables; the result changes when either does.
    pub fn zip_with<U: 'static, V: 'static>(
        &self,
        other: &Observable<U>,
        f: impl Fn(T, U) -> V + 'static,
    ) -> Observable<V> {
        let ra = Rc::clone(&self.read);
        let rb = Rc::clone(&other.read);
        Observable {
            read: Rc::new(move |p| f(ra(p), rb(p))),
            changed: Signal::merge(&self.changed, &other.changed),
        }
    }
}

/// A mutable cell backing an observable. Clones share the cell.
pub struct ObservableCell<T> {
    value: Rc<RefCell<T>>,
    changed: SignalSource<()>,
}

impl<T> Clone for ObservableCell<T> {
    fn clone(&self) -> Self {
        Self {
            value: Rc::clone(&self.value),
            changed: self.changed.clone(),
        }
    }
}

impl<T: Clone + 'static> ObservableCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Rc::new(RefCell::new(value)),
            changed: SignalSource::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Replace the value and fire the change signal; event context.
    pub fn set(&self, p: &Point, value: T) {
        *self.value.borrow_mut() = value;
        self.changed.trigger(p, &());
    }

    /// Update in place and fire the change signal; event context.
    pub fn modify(&self, p: &Point, f: impl FnOnce(&mut T)) {
        f(&mut self.value.borrow_mut());
        self.changed.trigger(p, &());
    }

    pub fn changed(&self) -> Signal<()> {
        self.changed.signal()
    }

    pub fn observable(&self) -> Observable<T> {
        let value = Rc::clone(&self.value);
        Observable::new(move |_| value.borrow().clone(), self.changed.signal())
    }
}
