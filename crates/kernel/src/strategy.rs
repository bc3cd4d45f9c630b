//! Ordering strategies.
//!
//! Resources, queues, and stream joins all order their waiters or items
//! under one of a small closed family of disciplines.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::rng::RngStream;

/// Ordering discipline for resource waiters and queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// First come, first served.
    #[default]
    Fcfs,
    /// Last come, first served.
    Lcfs,
    /// Service in random order.
    Siro,
    /// Smallest static priority leaves first.
    StaticPriorities,
}

/// An ordered container of entries obeying a [`Strategy`].
///
/// Entries on a `StaticPriorities` container are kept sorted by
/// `(priority, arrival)`, so equal priorities stay first come, first
/// served.
#[derive(Debug)]
pub(crate) struct StrategyQueue<T> {
    strategy: Strategy,
    entries: VecDeque<Entry<T>>,
}

#[derive(Debug)]
struct Entry<T> {
    priority: f64,
    item: T,
}

impl<T> StrategyQueue<T> {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            entries: VecDeque::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store an entry. Fatal on a `StaticPriorities` container, which
    /// requires `push_with_priority`.
    pub fn push(&mut self, item: T) {
        if self.strategy == Strategy::StaticPriorities {
            panic!("StrategyQueue::push: StaticPriorities requires an explicit priority");
        }
        self.insert(0.0, item);
    }

    /// Store an entry under a priority. Fatal unless the container uses
    /// `StaticPriorities`.
    pub fn push_with_priority(&mut self, priority: f64, item: T) {
        if self.strategy != Strategy::StaticPriorities {
            panic!(
                "StrategyQueue::push_with_priority: the {:?} strategy does not order by priority",
                self.strategy
            );
        }
        self.insert(priority, item);
    }

    fn insert(&mut self, priority: f64, item: T) {
        let entry = Entry { priority, item };
        match self.strategy {
            Strategy::StaticPriorities => {
                let at = self.entries.partition_point(|e| e.priority <= priority);
                self.entries.insert(at, entry);
            }
            _ => self.entries.push_back(entry),
        }
    }

    /// Remove the next entry under the strategy.
    pub fn pop(&mut self, rng: &mut RngStream) -> Option<T> {
        let entry = match self.strategy {
            Strategy::Fcfs | Strategy::StaticPriorities => self.entries.pop_front(),
            Strategy::Lcfs => self.entries.pop_back(),
            Strategy::Siro => {
                if self.entries.is_empty() {
                    None
                } else {
                    let at = rng.uniform_usize(self.entries.len());
                    self.entries.remove(at)
                }
            }
        };
        entry.map(|e| e.item)
    }

    /// Keep only entries satisfying the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|e| keep(&e.item));
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.item)
    }
}
