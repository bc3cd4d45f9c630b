//! Lazy, process-driven sequences.
//!
//! A [`Stream`] is conceptually infinite: each pull is a process step
//! yielding the head and the rest of the stream. Pulling consumes the
//! stream value; [`Stream::memo`] turns a stream into a restartable,
//! shared sequence every reader observes identically.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Failure;
use crate::point::Point;
use crate::process::{
    self, ContAux, ContParams, Linkage, Process, ProcessId, ResumeFn, Suspension, link,
    run_process_using,
};
use crate::queues::Queue;
use crate::resource::Resource;
use crate::signal::{Signal, SignalSource, Subscription};
use crate::strategy::Strategy;

/// A conceptually infinite sequence of values produced by process
/// steps.
pub struct Stream<T> {
    step: Process<(T, Stream<T>)>,
}

impl<T: 'static> Stream<T> {
    pub fn new(step: Process<(T, Stream<T>)>) -> Self {
        Self { step }
    }

    /// Run one step.
    pub fn pull(self) -> Process<(T, Stream<T>)> {
        self.step
    }

    /// Generate each item by running a fresh process.
    pub fn repeat_process(step: impl Fn() -> Process<T> + 'static) -> Stream<T> {
        fn go<T: 'static>(step: Rc<dyn Fn() -> Process<T>>) -> Stream<T> {
            let next = step();
            Stream::new(next.map(move |item| (item, go(step))))
        }
        go(Rc::new(step))
    }

    /// Prepend an item.
    pub fn delay(item: T, rest: Stream<T>) -> Stream<T> {
        Stream::new(Process::pure((item, rest)))
    }

    /// Pull the first `n` items.
    pub fn take(self, n: usize) -> Process<Vec<T>> {
        fn go<T: 'static>(stream: Stream<T>, n: usize, mut acc: Vec<T>) -> Process<Vec<T>> {
            if n == 0 {
                return Process::pure(acc);
            }
            stream.pull().and_then(move |(item, rest)| {
                acc.push(item);
                go(rest, n - 1, acc)
            })
        }
        go(self, n, Vec::new())
    }

    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + 'static) -> Stream<U> {
        self.map_rc(Rc::new(f))
    }

    fn map_rc<U: 'static>(self, f: Rc<dyn Fn(T) -> U>) -> Stream<U> {
        Stream::new(self.step.map(move |(item, rest)| {
            let mapped = f(item);
            (mapped, rest.map_rc(f))
        }))
    }

    /// Transform each item with a process.
    pub fn map_process<U: 'static>(self, f: impl Fn(T) -> Process<U> + 'static) -> Stream<U> {
        self.map_process_rc(Rc::new(f))
    }

    fn map_process_rc<U: 'static>(self, f: Rc<dyn Fn(T) -> Process<U>>) -> Stream<U> {
        Stream::new(self.step.and_then(move |(item, rest)| {
            let mapped = f(item);
            mapped.map(move |value| (value, rest.map_process_rc(f)))
        }))
    }

    pub fn filter(self, pred: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        self.filter_rc(Rc::new(pred))
    }

    fn filter_rc(self, pred: Rc<dyn Fn(&T) -> bool>) -> Stream<T> {
        Stream::new(self.step.and_then(move |(item, rest)| {
            if pred(&item) {
                Process::pure((item, rest.filter_rc(pred)))
            } else {
                rest.filter_rc(pred).pull()
            }
        }))
    }

    /// Filter with a process predicate.
    pub fn filter_process(self, pred: impl Fn(&T) -> Process<bool> + 'static) -> Stream<T> {
        self.filter_process_rc(Rc::new(pred))
    }

    fn filter_process_rc(self, pred: Rc<dyn Fn(&T) -> Process<bool>>) -> Stream<T> {
        Stream::new(self.step.and_then(move |(item, rest)| {
            let check = pred(&item);
            check.and_then(move |keep| {
                if keep {
                    Process::pure((item, rest.filter_process_rc(pred)))
                } else {
                    rest.filter_process_rc(pred).pull()
                }
            })
        }))
    }

    /// Pull left then right each step.
    pub fn zip_seq<U: 'static>(self, other: Stream<U>) -> Stream<(T, U)> {
        Stream::new(self.step.and_then(move |(a, ra)| {
            other.step.map(move |(b, rb)| ((a, b), ra.zip_seq(rb)))
        }))
    }

    /// Pull both sides as parallel sub-processes.
    pub fn zip_parallel<U: 'static>(self, other: Stream<U>) -> Stream<(T, U)> {
        Stream::new(
            process::par_zip(self.step, other.step)
                .map(|((a, ra), (b, rb))| ((a, b), ra.zip_parallel(rb))),
        )
    }

    /// Interleave two streams as they produce items.
    pub fn merge(self, other: Stream<T>) -> Stream<T> {
        Stream::concat(Strategy::Fcfs, vec![self, other])
    }

    /// Fan many streams into one: a writer process per input feeds a
    /// single one-slot handoff, and the reader takes items in arrival
    /// order under `strategy`. Writers are cancellation-linked to the
    /// reading process.
    pub fn concat(strategy: Strategy, streams: Vec<Stream<T>>) -> Stream<T> {
        Stream::new(Process::new(move |p, params: ContParams<(T, Stream<T>)>| {
            let handoff = Handoff::new(strategy);
            let reader_pid = params.pid().clone();
            for stream in streams {
                let child = ProcessId::new();
                link(&reader_pid, &child, Linkage::CancelTogether);
                run_process_using(p, child, handoff.write_all(stream));
            }
            handoff.reader().pull().run_with(p, params);
        }))
    }

    /// Fan pair streams of `(priority, item)` into one item stream;
    /// arrivals are ordered by static priority.
    pub fn concat_priority(streams: Vec<Stream<(f64, T)>>) -> Stream<T> {
        Stream::new(Process::new(move |p, params: ContParams<(T, Stream<T>)>| {
            let handoff = Handoff::new(Strategy::StaticPriorities);
            let reader_pid = params.pid().clone();
            for stream in streams {
                let child = ProcessId::new();
                link(&reader_pid, &child, Linkage::CancelTogether);
                run_process_using(p, child, handoff.write_all_priority(stream));
            }
            handoff.reader().pull().run_with(p, params);
        }))
    }

    /// Split into `n` consumer streams sharing one read cursor guarded
    /// by a single-permit resource under `strategy`.
    pub fn split(self, strategy: Strategy, n: usize) -> Vec<Stream<T>> {
        let guard = Resource::with_max_count(strategy, 1, Some(1));
        let cursor = Rc::new(RefCell::new(Some(self)));
        (0..n)
            .map(|_| split_reader(guard.clone(), Rc::clone(&cursor)))
            .collect()
    }

    /// Run a background writer that stays one item ahead of the reader.
    pub fn prefetch(self) -> Stream<T> {
        Stream::new(Process::new(move |p, params: ContParams<(T, Stream<T>)>| {
            let handoff = Handoff::new(Strategy::Fcfs);
            let child = ProcessId::new();
            link(params.pid(), &child, Linkage::CancelTogether);
            run_process_using(p, child, handoff.write_all(self));
            handoff.reader().pull().run_with(p, params);
        }))
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Share this stream so it can be read multiple times; every reader
    /// observes the identical sequence.
    pub fn memo(self) -> MemoStream<T> {
        MemoStream {
            cell: Rc::new(RefCell::new(MemoNode::Pending(Some(self.step)))),
        }
    }

    /// Buffer a signal's firings through a FCFS queue and read them as a
    /// stream. The subscription lives as long as the stream.
    pub fn from_signal(signal: &Signal<T>) -> Stream<T> {
        let queue: Queue<T> = Queue::fcfs();
        let sub = signal.subscribe({
            let queue = queue.clone();
            move |p, value: &T| queue.enqueue(p, value.clone())
        });
        let keep = Rc::new(sub);
        Stream::repeat_process(move || {
            let _ = &keep;
            queue.dequeue()
        })
    }

    /// Drive a signal from this stream through a spawned consumer
    /// process; completes with the signal once the consumer is running.
    pub fn to_signal(self) -> Process<Signal<T>> {
        let source = SignalSource::new();
        let signal = source.signal();
        process::spawn(Linkage::CancelTogether, consume_into(self, source)).map(move |_| signal)
    }
}

impl<A: Clone + 'static, B: Clone + 'static> Stream<(A, B)> {
    /// Split a pair stream into its components; both sides replay the
    /// shared input.
    pub fn unzip(self) -> (Stream<A>, Stream<B>) {
        let memo = self.memo();
        (
            memo.stream().map(|(a, _)| a),
            memo.stream().map(|(_, b)| b),
        )
    }
}

fn consume_into<T: Clone + 'static>(stream: Stream<T>, source: SignalSource<T>) -> Process<()> {
    stream.pull().and_then(move |(item, rest)| {
        let trigger = source.clone();
        Process::from_event(move |p| trigger.trigger(p, &item))
            .and_then(move |()| consume_into(rest, source))
    })
}

fn split_reader<T: 'static>(guard: Resource, cursor: Rc<RefCell<Option<Stream<T>>>>) -> Stream<T> {
    let next_guard = guard.clone();
    let next_cursor = Rc::clone(&cursor);
    let pull_one = {
        let guard = guard.clone();
        let cursor = Rc::clone(&cursor);
        guard.clone().request().and_then(move |()| {
            let stream = cursor
                .borrow_mut()
                .take()
                .expect("split: shared cursor is empty");
            let put_cursor = Rc::clone(&cursor);
            let release_guard = guard.clone();
            stream.pull().and_then(move |(item, rest)| {
                Process::from_event(move |p| {
                    *put_cursor.borrow_mut() = Some(rest);
                    release_guard.release(p);
                    item
                })
            })
        })
    };
    Stream::new(pull_one.map(move |item| (item, split_reader(next_guard, next_cursor))))
}

/// One-slot rendezvous between writer processes and a single reader.
pub(crate) struct Handoff<T> {
    slot: Rc<RefCell<Option<T>>>,
    read: Resource,
    write: Resource,
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
            read: self.read.clone(),
            write: self.write.clone(),
        }
    }
}

impl<T: 'static> Handoff<T> {
    /// `strategy` orders the writers contending for the slot.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
            read: Resource::with_max_count(Strategy::Fcfs, 0, Some(1)),
            write: Resource::with_max_count(strategy, 1, Some(1)),
        }
    }

    /// Move one item through the handoff.
    pub fn write_one(&self, item: T) -> Process<()> {
        let put = self.clone();
        self.write.request().and_then(move |()| {
            Process::from_event(move |p| {
                *put.slot.borrow_mut() = Some(item);
                put.read.release(p);
            })
        })
    }

    /// Writer loop: move every item of `stream` through the handoff.
    pub fn write_all(&self, stream: Stream<T>) -> Process<()> {
        let h = self.clone();
        stream.pull().and_then(move |(item, rest)| {
            let next = h.clone();
            h.write_one(item).and_then(move |()| next.write_all(rest))
        })
    }

    /// Writer loop over `(priority, item)` pairs; the slot is requested
    /// under the item's priority.
    pub fn write_all_priority(&self, stream: Stream<(f64, T)>) -> Process<()> {
        let h = self.clone();
        stream.pull().and_then(move |((priority, item), rest)| {
            let put = h.clone();
            let next = h.clone();
            h.write
                .request_with_priority(priority)
                .and_then(move |()| {
                    Process::from_event(move |p| {
                        *put.slot.borrow_mut() = Some(item);
                        put.read.release(p);
                    })
                })
                .and_then(move |()| next.write_all_priority(rest))
        })
    }

    /// The reading side as a stream.
    pub fn reader(&self) -> Stream<T> {
        let h = self.clone();
        let take = self.clone();
        Stream::new(
            h.read
                .request()
                .and_then(move |()| {
                    Process::from_event(move |p| {
                        let item = take
                            .slot
                            .borrow_mut()
                            .take()
                            .expect("handoff: empty slot after a read permit");
                        take.write.release(p);
                        item
                    })
                })
                .map(move |item| (item, h.reader())),
        )
    }
}

enum MemoNode<T> {
    /// Not yet pulled.
    Pending(Option<Process<(T, Stream<T>)>>),
    /// A reader is computing this element; others wait on the signal.
    Running(SignalSource<()>),
    Done(T, MemoStream<T>),
    Failed(Failure),
}

/// A restartable stream: a shared, replayable sequence of values.
pub struct MemoStream<T> {
    cell: Rc<RefCell<MemoNode<T>>>,
}

impl<T> Clone for MemoStream<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: Clone + 'static> MemoStream<T> {
    /// A fresh reader from the start of the shared sequence.
    pub fn stream(&self) -> Stream<T> {
        let memo = self.clone();
        Stream::new(Process::new(move |p, params| memo.step(p, params)))
    }

    fn settle(&self, node: MemoNode<T>) -> Option<SignalSource<()>> {
        let mut cell = self.cell.borrow_mut();
        if matches!(&*cell, MemoNode::Running(_)) {
            match std::mem::replace(&mut *cell, node) {
                MemoNode::Running(source) => Some(source),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    fn step(&self, p: &Point, params: ContParams<(T, Stream<T>)>) {
        enum Plan<T> {
            Deliver(T, MemoStream<T>),
            Fail(Failure),
            Wait(Signal<()>),
            Run(Process<(T, Stream<T>)>),
        }
        let plan = {
            let mut node = self.cell.borrow_mut();
            match &mut *node {
                MemoNode::Done(item, tail) => Plan::Deliver(item.clone(), tail.clone()),
                MemoNode::Failed(failure) => Plan::Fail(failure.clone()),
                MemoNode::Running(source) => Plan::Wait(source.signal()),
                MemoNode::Pending(slot) => {
                    let pull = slot.take().expect("memo: pending slot already taken");
                    *node = MemoNode::Running(SignalSource::new());
                    Plan::Run(pull)
                }
            }
        };
        match plan {
            Plan::Deliver(item, tail) => params.resume(p, (item, tail.stream())),
            Plan::Fail(failure) => params.fail(p, failure),
            Plan::Wait(signal) => {
                let memo = self.clone();
                let pid = params.pid().clone();
                let slot = Suspension::park(params);
                let handle: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
                let sub = signal.subscribe({
                    let slot = slot.clone();
                    let handle = Rc::clone(&handle);
                    move |p2, _| {
                        if let Some(sub) = handle.borrow_mut().take() {
                            sub.dispose();
                        }
                        if let Some(parked) = slot.unpark() {
                            memo.step(p2, parked);
                        }
                    }
                });
                *handle.borrow_mut() = Some(sub);
                let csub = pid.cancel_signal().subscribe({
                    let slot = slot.clone();
                    let handle = Rc::clone(&handle);
                    move |p2, _| {
                        if let Some(sub) = handle.borrow_mut().take() {
                            sub.dispose();
                        }
                        slot.cancel(p2);
                    }
                });
                slot.attach(csub);
            }
            Plan::Run(pull) => {
                let ContParams { cont, aux } = params;
                let store = self.clone();
                let first: ResumeFn<(T, Stream<T>)> =
                    Box::new(move |p2: &Point, (item, rest): (T, Stream<T>)| {
                        let tail = rest.memo();
                        let waiters = store.settle(MemoNode::Done(item.clone(), tail.clone()));
                        cont(p2, (item, tail.stream()));
                        if let Some(source) = waiters {
                            source.trigger(p2, &());
                        }
                    });
                let fail_store = self.clone();
                let cancel_store = self.clone();
                let outer_econt = Rc::clone(&aux.econt);
                let outer_ccont = Rc::clone(&aux.ccont);
                let aux2 = ContAux {
                    econt: Rc::new(move |p2: &Point, failure: Failure| {
                        let waiters = fail_store.settle(MemoNode::Failed(failure.clone()));
                        outer_econt(p2, failure);
                        if let Some(source) = waiters {
                            source.trigger(p2, &());
                        }
                    }),
                    ccont: Rc::new(move |p2: &Point| {
                        let waiters = cancel_store.settle(MemoNode::Failed(Failure::new(
                            "memo: producing process was cancelled",
                        )));
                        outer_ccont(p2);
                        if let Some(source) = waiters {
                            source.trigger(p2, &());
                        }
                    }),
                    pid: aux.pid.clone(),
                };
                pull.run_with(p, ContParams { cont: first, aux: aux2 });
            }
        }
    }
}
