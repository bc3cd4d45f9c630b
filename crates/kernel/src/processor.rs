//! Stream transformers.
//!
//! A [`Processor`] turns one stream into another. Processors compose
//! like functions, operate on the components of pair streams, tie
//! feedback loops through memoized streams, and fan work across
//! parallel branches joined back under a strategy.

use std::cell::RefCell;
use std::rc::Rc;

use crate::process::{ContParams, Linkage, Process, ProcessId, link, run_process_using};
use crate::queues::{Fifo, Queue};
use crate::stream::{Handoff, Stream};
use crate::strategy::Strategy;

/// A left-or-right item flowing through a choice combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

/// A transformer from one stream to another.
pub struct Processor<A, B> {
    apply: Box<dyn FnOnce(Stream<A>) -> Stream<B>>,
}

impl<A: 'static, B: 'static> Processor<A, B> {
    pub fn new(f: impl FnOnce(Stream<A>) -> Stream<B> + 'static) -> Self {
        Self { apply: Box::new(f) }
    }

    /// Feed a stream through.
    pub fn apply(self, input: Stream<A>) -> Stream<B> {
        (self.apply)(input)
    }

    /// Lift a pointwise function.
    pub fn arr(f: impl Fn(A) -> B + 'static) -> Self {
        Processor::new(move |input| input.map(f))
    }

    /// Lift a process-valued function.
    pub fn arr_process(f: impl Fn(A) -> Process<B> + 'static) -> Self {
        Processor::new(move |input| input.map_process(f))
    }

    /// Compose: `self` then `next`.
    pub fn compose<C: 'static>(self, next: Processor<B, C>) -> Processor<A, C> {
        Processor::new(move |input| next.apply(self.apply(input)))
    }

    /// Apply to the first component of a pair stream.
    pub fn first<C: Clone + 'static>(self) -> Processor<(A, C), (B, C)>
    where
        A: Clone,
    {
        Processor::new(move |input: Stream<(A, C)>| {
            let (xs, cs) = input.unzip();
            self.apply(xs).zip_seq(cs)
        })
    }

    /// Apply to the second component of a pair stream.
    pub fn second<C: Clone + 'static>(self) -> Processor<(C, A), (C, B)>
    where
        A: Clone,
    {
        Processor::new(move |input: Stream<(C, A)>| {
            let (cs, xs) = input.unzip();
            cs.zip_seq(self.apply(xs))
        })
    }

    /// Run two processors over the components of a pair stream.
    pub fn product<C: Clone + 'static, D: 'static>(
        self,
        other: Processor<C, D>,
    ) -> Processor<(A, C), (B, D)>
    where
        A: Clone,
    {
        Processor::new(move |input: Stream<(A, C)>| {
            let (xs, cs) = input.unzip();
            self.apply(xs).zip_seq(other.apply(cs))
        })
    }

    /// Tie a feedback loop: the `C` output is memoized and replayed back
    /// into the input pair one step behind, seeded with `init`.
    pub fn feedback<C: Clone + 'static>(
        init: C,
        body: Processor<(A, C), (B, C)>,
    ) -> Processor<A, B>
    where
        B: Clone,
    {
        Processor::new(move |input| {
            let (feed, bind) = late_bound::<C>();
            let out = body.apply(input.zip_seq(feed)).memo();
            let bs = out.stream().map(|(b, _)| b);
            let cs = out.stream().map(|(_, c)| c);
            bind(Stream::delay(init, cs));
            bs
        })
    }

    /// Route `Left` items through the processor and pass `Right` items
    /// untouched, preserving arrival order. The processor must yield one
    /// output per input.
    pub fn choice_left<C: 'static>(self) -> Processor<Either<A, C>, Either<B, C>> {
        Processor::new(move |input: Stream<Either<A, C>>| {
            let channel = Handoff::new(Strategy::Fcfs);
            let out = self.apply(channel.reader());
            let cursor = Rc::new(RefCell::new(Some(out)));
            choice_go(input, channel, cursor, Either::Left, Either::Right, |item| {
                match item {
                    Either::Left(a) => Ok(a),
                    Either::Right(c) => Err(c),
                }
            })
        })
    }

    /// Route `Right` items through the processor and pass `Left` items
    /// untouched, preserving arrival order. The processor must yield one
    /// output per input.
    pub fn choice_right<C: 'static>(self) -> Processor<Either<C, A>, Either<C, B>> {
        Processor::new(move |input: Stream<Either<C, A>>| {
            let channel = Handoff::new(Strategy::Fcfs);
            let out = self.apply(channel.reader());
            let cursor = Rc::new(RefCell::new(Some(out)));
            choice_go(input, channel, cursor, Either::Right, Either::Left, |item| {
                match item {
                    Either::Right(a) => Ok(a),
                    Either::Left(c) => Err(c),
                }
            })
        })
    }

    /// Fan the input across branches under a split strategy and join
    /// their outputs under another.
    pub fn parallel_using(
        split: Strategy,
        join: Strategy,
        branches: Vec<Processor<A, B>>,
    ) -> Processor<A, B> {
        Processor::new(move |input| {
            let inputs = input.split(split, branches.len());
            let outputs = branches
                .into_iter()
                .zip(inputs)
                .map(|(branch, substream)| branch.apply(substream))
                .collect();
            Stream::concat(join, outputs)
        })
    }

    /// First come, first served fan-out and fan-in.
    pub fn parallel(branches: Vec<Processor<A, B>>) -> Processor<A, B> {
        Self::parallel_using(Strategy::Fcfs, Strategy::Fcfs, branches)
    }

    /// Branches emit `(priority, item)`; outputs join under static
    /// priorities.
    pub fn parallel_priority(
        split: Strategy,
        branches: Vec<Processor<A, (f64, B)>>,
    ) -> Processor<A, B> {
        Processor::new(move |input| {
            let inputs = input.split(split, branches.len());
            let outputs = branches
                .into_iter()
                .zip(inputs)
                .map(|(branch, substream)| branch.apply(substream))
                .collect();
            Stream::concat_priority(outputs)
        })
    }
}

impl<A: Clone + 'static> Processor<A, A> {
    /// The identity transformer.
    pub fn identity() -> Processor<A, A> {
        Processor::new(|input| input)
    }

    /// Buffer through an unbounded queue: a spawned consumer feeds the
    /// queue, downstream pulls from it.
    pub fn buffer(queue: Queue<A>) -> Processor<A, A> {
        Processor::new(move |input| {
            let dequeue_from = queue.clone();
            Stream::new(Process::new(move |p, params: ContParams<(A, Stream<A>)>| {
                let child = ProcessId::new();
                link(params.pid(), &child, Linkage::CancelTogether);
                run_process_using(p, child, feed_queue(input, queue));
                Stream::repeat_process(move || dequeue_from.dequeue())
                    .pull()
                    .run_with(p, params);
            }))
        })
    }

    /// Buffer through a bounded FIFO; the feeding consumer blocks while
    /// the buffer is full.
    pub fn buffer_bounded(fifo: Fifo<A>) -> Processor<A, A> {
        Processor::new(move |input| {
            let dequeue_from = fifo.clone();
            Stream::new(Process::new(move |p, params: ContParams<(A, Stream<A>)>| {
                let child = ProcessId::new();
                link(params.pid(), &child, Linkage::CancelTogether);
                run_process_using(p, child, feed_fifo(input, fifo));
                Stream::repeat_process(move || dequeue_from.dequeue())
                    .pull()
                    .run_with(p, params);
            }))
        })
    }

    /// Prefetch one item ahead of the reader.
    pub fn prefetching() -> Processor<A, A> {
        Processor::new(|input| input.prefetch())
    }
}

fn feed_queue<A: Clone + 'static>(stream: Stream<A>, queue: Queue<A>) -> Process<()> {
    stream.pull().and_then(move |(item, rest)| {
        let sink = queue.clone();
        Process::from_event(move |p| sink.enqueue(p, item))
            .and_then(move |()| feed_queue(rest, queue))
    })
}

fn feed_fifo<A: 'static>(stream: Stream<A>, fifo: Fifo<A>) -> Process<()> {
    stream.pull().and_then(move |(item, rest)| {
        let next = fifo.clone();
        fifo.enqueue(item).and_then(move |()| feed_fifo(rest, next))
    })
}

fn late_bound<T: 'static>() -> (Stream<T>, impl FnOnce(Stream<T>)) {
    let cell: Rc<RefCell<Option<Stream<T>>>> = Rc::new(RefCell::new(None));
    let stream = late_reader(Rc::clone(&cell));
    let bind = move |bound: Stream<T>| {
        *cell.borrow_mut() = Some(bound);
    };
    (stream, bind)
}

fn late_reader<T: 'static>(cell: Rc<RefCell<Option<Stream<T>>>>) -> Stream<T> {
    Stream::new(Process::new(move |p, params| {
        let stream = cell
            .borrow_mut()
            .take()
            .expect("feedback: stream read before it was bound");
        let put_back = Rc::clone(&cell);
        let next = Rc::clone(&cell);
        stream
            .pull()
            .map(move |(item, rest)| {
                *put_back.borrow_mut() = Some(rest);
                (item, late_reader(next))
            })
            .run_with(p, params);
    }))
}

fn choice_go<I: 'static, O: 'static, A: 'static, B: 'static, P: 'static>(
    input: Stream<I>,
    channel: Handoff<A>,
    cursor: Rc<RefCell<Option<Stream<B>>>>,
    wrap: impl Fn(B) -> O + Copy + 'static,
    pass: impl Fn(P) -> O + Copy + 'static,
    route: impl Fn(I) -> Result<A, P> + Copy + 'static,
) -> Stream<O> {
    Stream::new(input.pull().and_then(move |(item, rest)| {
        match route(item) {
            Err(other) => Process::pure((
                pass(other),
                choice_go(rest, channel, cursor, wrap, pass, route),
            )),
            Ok(routed) => {
                let next_channel = channel.clone();
                let pull_cursor = Rc::clone(&cursor);
                channel.write_one(routed).and_then(move |()| {
                    let out = pull_cursor
                        .borrow_mut()
                        .take()
                        .expect("choice: output stream is already in use");
                    let put_back = Rc::clone(&pull_cursor);
                    out.pull().map(move |(transformed, out_rest)| {
                        *put_back.borrow_mut() = Some(out_rest);
                        (
                            wrap(transformed),
                            choice_go(rest, next_channel, pull_cursor, wrap, pass, route),
                        )
                    })
                })
            }
        }
    }))
}
