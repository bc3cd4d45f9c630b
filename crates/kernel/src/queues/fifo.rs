//! Bounded circular-buffer queues.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::point::Point;
use crate::process::Process;
use crate::resource::Resource;
use crate::strategy::Strategy;

struct FifoInner<T> {
    ring: RefCell<Vec<Option<T>>>,
    start: Cell<usize>,
    count: Cell<usize>,
    enqueue_count: Cell<u64>,
    dequeue_count: Cell<u64>,
    lost_count: Cell<u64>,
    read: Resource,
    write: Resource,
}

/// A bounded FIFO buffer: writers block when full, readers when empty.
/// Clones share the buffer.
pub struct Fifo<T> {
    inner: Rc<FifoInner<T>>,
}

impl<T> Clone for Fifo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Fifo<T> {
    /// A buffer holding at most `capacity` items. Fatal on a zero
    /// capacity.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Fifo::new: capacity must be positive");
        }
        Self {
            inner: Rc::new(FifoInner {
                ring: RefCell::new((0..capacity).map(|_| None).collect()),
                start: Cell::new(0),
                count: Cell::new(0),
                enqueue_count: Cell::new(0),
                dequeue_count: Cell::new(0),
                lost_count: Cell::new(0),
                read: Resource::with_max_count(Strategy::Fcfs, 0, Some(capacity as i64)),
                write: Resource::with_max_count(Strategy::Fcfs, capacity as i64, Some(capacity as i64)),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.ring.borrow().len()
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.inner.count.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Total items ever stored.
    pub fn enqueue_count(&self) -> u64 {
        self.inner.enqueue_count.get()
    }

    /// Total items ever removed.
    pub fn dequeue_count(&self) -> u64 {
        self.inner.dequeue_count.get()
    }

    /// Items dropped by [`Fifo::enqueue_or_lost`].
    pub fn lost_count(&self) -> u64 {
        self.inner.lost_count.get()
    }

    fn put(&self, item: T) {
        let mut ring = self.inner.ring.borrow_mut();
        let capacity = ring.len();
        let at = (self.inner.start.get() + self.inner.count.get()) % capacity;
        ring[at] = Some(item);
        self.inner.count.set(self.inner.count.get() + 1);
        self.inner.enqueue_count.set(self.inner.enqueue_count.get() + 1);
    }

    fn take(&self) -> T {
        let mut ring = self.inner.ring.borrow_mut();
        let capacity = ring.len();
        let at = self.inner.start.get();
        let item = ring[at].take().expect("fifo: empty slot at read position");
        self.inner.start.set((at + 1) % capacity);
        self.inner.count.set(self.inner.count.get() - 1);
        self.inner.dequeue_count.set(self.inner.dequeue_count.get() + 1);
        item
    }

    /// Store an item, suspending while the buffer is full.
    pub fn enqueue(&self, item: T) -> Process<()> {
        let write = self.inner.write.clone();
        let fifo = self.clone();
        write.request().and_then(move |()| {
            Process::from_event(move |p| {
                fifo.put(item);
                fifo.inner.read.release(p);
            })
        })
    }

    /// Remove the oldest item, suspending while the buffer is empty.
    pub fn dequeue(&self) -> Process<T> {
        let read = self.inner.read.clone();
        let fifo = self.clone();
        read.request().and_then(move |()| {
            Process::from_event(move |p| {
                let item = fifo.take();
                fifo.inner.write.release(p);
                item
            })
        })
    }

    /// Store an item when space is immediately available, else count it
    /// lost and drop it. Event context.
    pub fn enqueue_or_lost(&self, p: &Point, item: T) -> bool {
        if self.inner.write.try_request() {
            self.put(item);
            self.inner.read.release(p);
            true
        } else {
            self.inner.lost_count.set(self.inner.lost_count.get() + 1);
            trace!(lost = self.inner.lost_count.get(), "fifo item lost");
            false
        }
    }

    /// Store without suspending; gives the item back when the buffer is
    /// full. Event context.
    pub fn try_enqueue(&self, p: &Point, item: T) -> Result<(), T> {
        if self.inner.write.try_request() {
            self.put(item);
            self.inner.read.release(p);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Remove without suspending. Event context.
    pub fn try_dequeue(&self, p: &Point) -> Option<T> {
        if self.inner.read.try_request() {
            let item = self.take();
            self.inner.write.release(p);
            Some(item)
        } else {
            None
        }
    }
}
