//! Cooperative, suspendable processes.
//!
//! A process is a continuation-passing computation driven by the event
//! queue: it runs synchronously until it suspends (`hold`, `passivate`,
//! `await_signal`, a resource request, a blocking queue operation) and is
//! resumed by a later event. Every resume boundary checks the cancel
//! flag, and every suspension site registers a cleanup on the process's
//! cancel signal, so a cancelled process leaves no waiter entries or
//! subscriptions behind.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, error, trace};

use crate::error::Failure;
use crate::point::Point;
use crate::run::Run;
use crate::signal::{Signal, SignalSource, Subscription};

pub(crate) type ResumeFn<T> = Box<dyn FnOnce(&Point, T)>;
pub(crate) type ErrorFn = Rc<dyn Fn(&Point, Failure)>;
pub(crate) type CancelFn = Rc<dyn Fn(&Point)>;

/// Continuation parameters threaded through a process computation.
pub struct ContParams<T> {
    pub(crate) cont: ResumeFn<T>,
    pub(crate) aux: ContAux,
}

/// The continuation parts shared by every frame: the error and cancel
/// paths plus the process identity.
#[derive(Clone)]
pub(crate) struct ContAux {
    pub(crate) econt: ErrorFn,
    pub(crate) ccont: CancelFn,
    pub(crate) pid: ProcessId,
}

impl<T: 'static> ContParams<T> {
    /// Resume with a value, diverting to the cancellation path when a
    /// cancel request arrived while the computation was suspended.
    pub fn resume(self, p: &Point, value: T) {
        let pid = &self.aux.pid;
        if pid.finished() {
            return;
        }
        if pid.cancel_requested() {
            (self.aux.ccont)(p);
        } else {
            (self.cont)(p, value);
        }
    }

    /// Divert to the error path.
    pub fn fail(self, p: &Point, failure: Failure) {
        (self.aux.econt)(p, failure);
    }

    /// Divert to the cancellation path.
    pub fn cancelled(self, p: &Point) {
        (self.aux.ccont)(p);
    }

    /// Identity of the process this computation runs under.
    pub fn pid(&self) -> &ProcessId {
        &self.aux.pid
    }
}

struct HoldState {
    epoch: u64,
    wake: Rc<dyn Fn(&Point)>,
}

struct PidState {
    catch_enabled: bool,
    started: Cell<bool>,
    finished: Cell<bool>,
    cancelled: Cell<bool>,
    cancel_requested: Cell<bool>,
    interrupted: Cell<bool>,
    hold: RefCell<Option<HoldState>>,
    hold_epoch: Cell<u64>,
    passive: RefCell<Option<Rc<dyn Fn(&Point)>>>,
    failure: RefCell<Option<Failure>>,
    cancel_source: SignalSource<()>,
}

/// Handle identifying a process. Clones share the same process.
///
/// Creating a handle does not start anything; pass it to one of the
/// start functions.
#[derive(Clone)]
pub struct ProcessId {
    state: Rc<PidState>,
}

impl ProcessId {
    /// A fresh handle; exception handlers are disabled.
    pub fn new() -> Self {
        Self::make(false)
    }

    /// A fresh handle for a process allowed to install exception
    /// handlers with `catch`/`finally`.
    pub fn with_catch() -> Self {
        Self::make(true)
    }

    fn make(catch_enabled: bool) -> Self {
        Self {
            state: Rc::new(PidState {
                catch_enabled,
                started: Cell::new(false),
                finished: Cell::new(false),
                cancelled: Cell::new(false),
                cancel_requested: Cell::new(false),
                interrupted: Cell::new(false),
                hold: RefCell::new(None),
                hold_epoch: Cell::new(0),
                passive: RefCell::new(None),
                failure: RefCell::new(None),
                cancel_source: SignalSource::new(),
            }),
        }
    }

    pub fn started(&self) -> bool {
        self.state.started.get()
    }

    pub fn finished(&self) -> bool {
        self.state.finished.get()
    }

    pub fn cancelled(&self) -> bool {
        self.state.cancelled.get()
    }

    /// Whether a cancel request is pending or already honoured.
    pub fn cancel_requested(&self) -> bool {
        self.state.cancel_requested.get()
    }

    /// Whether the last `hold` ended in an interrupt.
    pub fn interrupted(&self) -> bool {
        self.state.interrupted.get()
    }

    pub fn catch_enabled(&self) -> bool {
        self.state.catch_enabled
    }

    /// The failure that terminated the process, when it ended in one.
    pub fn failure(&self) -> Option<Failure> {
        self.state.failure.borrow().clone()
    }

    /// Fires when the process is asked to cancel.
    pub fn cancel_signal(&self) -> Signal<()> {
        self.state.cancel_source.signal()
    }

    fn mark_finished(&self) {
        self.state.finished.set(true);
    }

    fn mark_cancelled(&self) {
        self.state.cancelled.set(true);
        self.state.finished.set(true);
    }

    fn mark_failed(&self, failure: Failure) {
        *self.state.failure.borrow_mut() = Some(failure);
        self.state.finished.set(true);
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

/// A cooperative coroutine yielding a value of type `T`.
pub struct Process<T> {
    run: Box<dyn FnOnce(&Point, ContParams<T>)>,
}

impl<T: 'static> Process<T> {
    pub fn new(f: impl FnOnce(&Point, ContParams<T>) + 'static) -> Self {
        Self { run: Box::new(f) }
    }

    /// Run with explicit continuation parameters.
    pub(crate) fn run_with(self, p: &Point, params: ContParams<T>) {
        (self.run)(p, params)
    }

    /// A completed computation.
    pub fn pure(value: T) -> Self {
        Process::new(move |p, params| params.resume(p, value))
    }

    /// Raise a failure on the error path.
    pub fn throw(failure: Failure) -> Self {
        Process::new(move |p, params| params.fail(p, failure))
    }

    /// Lift an event-context computation.
    pub fn from_event(f: impl FnOnce(&Point) -> T + 'static) -> Self {
        Process::new(move |p, params| {
            let value = f(p);
            params.resume(p, value);
        })
    }

    /// Sequence: run `self`, feed its value to `k`.
    pub fn and_then<U: 'static>(self, k: impl FnOnce(T) -> Process<U> + 'static) -> Process<U> {
        Process::new(move |p, params: ContParams<U>| {
            let ContParams { cont, aux } = params;
            let inner_aux = aux.clone();
            let inner = ContParams {
                cont: Box::new(move |p2: &Point, value: T| {
                    k(value).run_with(p2, ContParams { cont, aux });
                }),
                aux: inner_aux,
            };
            self.run_with(p, inner);
        })
    }

    /// Sequence: run `self`, discard its value, then run `next`.
    pub fn then<U: 'static>(self, next: Process<U>) -> Process<U> {
        self.and_then(move |_| next)
    }

    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Process<U> {
        self.and_then(move |value| Process::pure(f(value)))
    }

    /// Discard the value.
    pub fn void(self) -> Process<()> {
        self.map(|_| ())
    }

    /// Handle a failure raised by `self`. Fatal unless the process was
    /// created with [`ProcessId::with_catch`].
    pub fn catch(self, handler: impl FnOnce(Failure) -> Process<T> + 'static) -> Process<T> {
        Process::new(move |p, params: ContParams<T>| {
            if !params.aux.pid.catch_enabled() {
                panic!("catch: process does not allow exception handlers");
            }
            let ContParams { cont, aux } = params;
            let shared_cont: Rc<RefCell<Option<ResumeFn<T>>>> = Rc::new(RefCell::new(Some(cont)));
            let handler_cell = RefCell::new(Some(handler));
            let outer = aux.clone();
            let guarded = ContAux {
                econt: Rc::new({
                    let shared_cont = Rc::clone(&shared_cont);
                    move |p2: &Point, failure: Failure| {
                        let taken = (handler_cell.borrow_mut().take(), shared_cont.borrow_mut().take());
                        match taken {
                            (Some(handler), Some(cont)) => {
                                handler(failure).run_with(p2, ContParams { cont, aux: outer.clone() });
                            }
                            _ => (outer.econt)(p2, failure),
                        }
                    }
                }),
                ccont: Rc::clone(&aux.ccont),
                pid: aux.pid.clone(),
            };
            let first: ResumeFn<T> = Box::new({
                let shared_cont = Rc::clone(&shared_cont);
                move |p2: &Point, value: T| {
                    if let Some(cont) = shared_cont.borrow_mut().take() {
                        cont(p2, value);
                    }
                }
            });
            self.run_with(p, ContParams { cont: first, aux: guarded });
        })
    }

    /// Run `cleanup` when `self` completes, fails, or is cancelled.
    /// Fatal unless the process allows exception handlers.
    pub fn finally(self, cleanup: impl FnOnce(&Point) + 'static) -> Process<T> {
        Process::new(move |p, params: ContParams<T>| {
            if !params.aux.pid.catch_enabled() {
                panic!("finally: process does not allow exception handlers");
            }
            let ContParams { cont, aux } = params;
            let cleanup = Rc::new(RefCell::new(Some(cleanup)));
            let run_cleanup: Rc<dyn Fn(&Point)> = Rc::new(move |p2: &Point| {
                if let Some(f) = cleanup.borrow_mut().take() {
                    f(p2);
                }
            });
            let guarded = ContAux {
                econt: Rc::new({
                    let run_cleanup = Rc::clone(&run_cleanup);
                    let outer = Rc::clone(&aux.econt);
                    move |p2: &Point, failure: Failure| {
                        run_cleanup(p2);
                        outer(p2, failure);
                    }
                }),
                ccont: Rc::new({
                    let run_cleanup = Rc::clone(&run_cleanup);
                    let outer = Rc::clone(&aux.ccont);
                    move |p2: &Point| {
                        run_cleanup(p2);
                        outer(p2);
                    }
                }),
                pid: aux.pid.clone(),
            };
            let first: ResumeFn<T> = Box::new({
                let run_cleanup = Rc::clone(&run_cleanup);
                move |p2: &Point, value: T| {
                    run_cleanup(p2);
                    cont(p2, value);
                }
            });
            self.run_with(p, ContParams { cont: first, aux: guarded });
        })
    }
}

/// Terminal result of a started process, delivered to the start site.
pub(crate) enum Outcome<T> {
    Completed(T),
    Failed(Failure),
    Cancelled,
}

/// Start `proc` under `pid` in the event context, delivering the
/// terminal outcome to `done`. Fatal when the handle was already
/// started.
pub(crate) fn start_with_outcome<T: 'static>(
    p: &Point,
    pid: ProcessId,
    proc: Process<T>,
    done: impl FnOnce(&Point, Outcome<T>) + 'static,
) {
    if pid.state.started.replace(true) {
        panic!("run_process: process already started");
    }
    let done = Rc::new(RefCell::new(Some(done)));
    let cont: ResumeFn<T> = Box::new({
        let pid = pid.clone();
        let done = Rc::clone(&done);
        move |p2: &Point, value: T| {
            pid.mark_finished();
            trace!("process finished");
            if let Some(done) = done.borrow_mut().take() {
                done(p2, Outcome::Completed(value));
            }
        }
    });
    let econt: ErrorFn = Rc::new({
        let pid = pid.clone();
        let done = Rc::clone(&done);
        move |p2: &Point, failure: Failure| {
            pid.mark_failed(failure.clone());
            debug!(%failure, "process failed");
            if let Some(done) = done.borrow_mut().take() {
                done(p2, Outcome::Failed(failure));
            }
        }
    });
    let ccont: CancelFn = Rc::new({
        let pid = pid.clone();
        let done = Rc::clone(&done);
        move |p2: &Point| {
            pid.mark_cancelled();
            trace!("process cancelled");
            if let Some(done) = done.borrow_mut().take() {
                done(p2, Outcome::Cancelled);
            }
        }
    });
    let params = ContParams {
        cont,
        aux: ContAux {
            econt,
            ccont,
            pid: pid.clone(),
        },
    };
    if pid.cancel_requested() {
        params.cancelled(p);
        return;
    }
    proc.run_with(p, params);
}

/// Start a process in the event context; returns its handle.
pub fn run_process<T: 'static>(p: &Point, proc: Process<T>) -> ProcessId {
    let pid = ProcessId::new();
    run_process_using(p, pid.clone(), proc);
    pid
}

/// Start a process under an existing handle. An unhandled failure in a
/// non-catch process aborts the run.
pub fn run_process_using<T: 'static>(p: &Point, pid: ProcessId, proc: Process<T>) {
    let handle = pid.clone();
    start_with_outcome(p, pid, proc, move |p2, outcome| {
        if let Outcome::Failed(failure) = outcome {
            if !handle.catch_enabled() {
                error!(%failure, "unhandled process failure aborts the run");
                p2.run.record_abort(failure);
            }
        }
    });
}

/// Schedule a process to start at time `t`; event context.
pub fn enqueue_process<T: 'static>(p: &Point, t: f64, proc: Process<T>) -> ProcessId {
    let pid = ProcessId::new();
    let handle = pid.clone();
    p.run.queue.enqueue(t, move |p2| run_process_using(p2, handle, proc));
    pid
}

/// Schedule a process during model assembly, before the run drives.
pub fn schedule_process<T: 'static>(run: &Rc<Run>, t: f64, proc: Process<T>) -> ProcessId {
    let pid = ProcessId::new();
    schedule_process_using(run, t, pid.clone(), proc);
    pid
}

/// Schedule a process under an existing handle during model assembly.
pub fn schedule_process_using<T: 'static>(run: &Rc<Run>, t: f64, pid: ProcessId, proc: Process<T>) {
    run.queue.enqueue(t, move |p| run_process_using(p, pid, proc));
}

/// Cancellation linkage between a parent and a spawned child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Cancelling either side cancels the other.
    CancelTogether,
    /// Cancelling the parent cancels the child, not vice versa.
    CancelChildAfterParent,
    /// No cancellation propagation.
    NoLinkage,
}

/// Install cancellation propagation between `parent` and `child`.
pub(crate) fn link(parent: &ProcessId, child: &ProcessId, linkage: Linkage) {
    match linkage {
        Linkage::CancelTogether => {
            propagate(parent, child);
            propagate(child, parent);
        }
        Linkage::CancelChildAfterParent => propagate(parent, child),
        Linkage::NoLinkage => {}
    }
}

fn propagate(from: &ProcessId, to: &ProcessId) {
    let target = to.clone();
    // Cancel on a finished process is a no-op, so the subscription may
    // outlive the target.
    let _ = from
        .state
        .cancel_source
        .subscribe(move |p, _| cancel_process(p, &target));
}

/// Start `child` from inside a process, linked to the current process
/// under `linkage`; completes immediately with the child's handle.
pub fn spawn(linkage: Linkage, child: Process<()>) -> Process<ProcessId> {
    let pid = ProcessId::new();
    let handle = pid.clone();
    spawn_using(linkage, pid, child).map(move |()| handle)
}

/// Start `child` under an existing handle from inside a process.
pub fn spawn_using(linkage: Linkage, pid: ProcessId, child: Process<()>) -> Process<()> {
    Process::new(move |p, params| {
        link(&params.aux.pid, &pid, linkage);
        run_process_using(p, pid, child);
        params.resume(p, ());
    })
}

/// Request cancellation: set the flag and fire the cancel signal. A
/// suspended process takes its cancel branch now; a running one at its
/// next cooperative boundary. No-op on a finished process.
pub fn cancel_process(p: &Point, pid: &ProcessId) {
    if pid.finished() || pid.state.cancel_requested.replace(true) {
        return;
    }
    debug!("process cancel requested");
    pid.state.cancel_source.trigger(p, &());
}

/// Resume a passivated process at the current time by scheduling a
/// zero-delay event. No-op unless the process is passive.
pub fn reactivate(p: &Point, pid: &ProcessId) {
    if pid.finished() {
        return;
    }
    if let Some(wake) = pid.state.passive.borrow_mut().take() {
        trace!("reactivate");
        p.run.queue.enqueue(p.time, move |p2| wake(p2));
    }
}

/// Wake a process out of a `hold` ahead of schedule: the pending timer
/// event becomes inert and `interrupted` reads true in the resumed
/// continuation. No-op unless the process is holding.
pub fn interrupt(p: &Point, pid: &ProcessId) {
    if pid.finished() {
        return;
    }
    if let Some(hold) = pid.state.hold.borrow_mut().take() {
        pid.state.interrupted.set(true);
        trace!("interrupt");
        let wake = hold.wake;
        p.run.queue.enqueue(p.time, move |p2| wake(p2));
    }
}

/// One-shot parking slot for a suspended continuation, shared between
/// the normal wake path and the cancellation path. Subscriptions
/// attached to the slot are disposed when it is consumed.
pub(crate) struct Suspension<T> {
    inner: Rc<SuspensionInner<T>>,
}

struct SuspensionInner<T> {
    params: RefCell<Option<ContParams<T>>>,
    cleanups: RefCell<Vec<Subscription>>,
}

impl<T> Clone for Suspension<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Suspension<T> {
    pub fn park(params: ContParams<T>) -> Self {
        Self {
            inner: Rc::new(SuspensionInner {
                params: RefCell::new(Some(params)),
                cleanups: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register a subscription disposed when the slot is consumed.
    pub fn attach(&self, sub: Subscription) {
        self.inner.cleanups.borrow_mut().push(sub);
    }

    /// Take the parked continuation, disposing attached subscriptions.
    pub fn unpark(&self) -> Option<ContParams<T>> {
        let params = self.inner.params.borrow_mut().take()?;
        for sub in self.inner.cleanups.borrow_mut().drain(..) {
            sub.dispose();
        }
        Some(params)
    }

    /// Resume normally; false when the slot was already consumed.
    pub fn wake(&self, p: &Point, value: T) -> bool {
        match self.unpark() {
            Some(params) => {
                params.resume(p, value);
                true
            }
            None => false,
        }
    }

    /// Divert to the error path.
    pub fn fail(&self, p: &Point, failure: Failure) -> bool {
        match self.unpark() {
            Some(params) => {
                params.fail(p, failure);
                true
            }
            None => false,
        }
    }

    /// Divert to the cancellation path.
    pub fn cancel(&self, p: &Point) -> bool {
        match self.unpark() {
            Some(params) => {
                params.cancelled(p);
                true
            }
            None => false,
        }
    }
}

/// Suspend the current process for `dt` of simulated time. Fatal on a
/// negative duration.
pub fn hold(dt: f64) -> Process<()> {
    Process::new(move |p, params| {
        if dt < 0.0 {
            panic!("hold: negative duration {dt}");
        }
        let pid = params.aux.pid.clone();
        pid.state.interrupted.set(false);
        let epoch = pid.state.hold_epoch.get() + 1;
        pid.state.hold_epoch.set(epoch);

        let slot = Suspension::park(params);
        let wake: Rc<dyn Fn(&Point)> = Rc::new({
            let slot = slot.clone();
            move |p2: &Point| {
                slot.wake(p2, ());
            }
        });
        let sub = pid.cancel_signal().subscribe({
            let slot = slot.clone();
            let pid = pid.clone();
            move |p2, _| {
                pid.state.hold.borrow_mut().take();
                slot.cancel(p2);
            }
        });
        slot.attach(sub);

        *pid.state.hold.borrow_mut() = Some(HoldState {
            epoch,
            wake: Rc::clone(&wake),
        });
        trace!(dt, "hold");
        p.run.queue.enqueue(p.time + dt, {
            let pid = pid.clone();
            move |p2| {
                let live = matches!(
                    *pid.state.hold.borrow(),
                    Some(HoldState { epoch: e, .. }) if e == epoch
                );
                if live {
                    pid.state.hold.borrow_mut().take();
                    wake(p2);
                }
            }
        });
    })
}

/// Suspend until another party reactivates the process. Fatal when the
/// process is already passive.
pub fn passivate() -> Process<()> {
    Process::new(move |_p, params| {
        let pid = params.aux.pid.clone();
        if pid.state.passive.borrow().is_some() {
            panic!("passivate: process is already passive");
        }
        let slot = Suspension::park(params);
        let sub = pid.cancel_signal().subscribe({
            let slot = slot.clone();
            let pid = pid.clone();
            move |p2, _| {
                pid.state.passive.borrow_mut().take();
                slot.cancel(p2);
            }
        });
        slot.attach(sub);
        let wake: Rc<dyn Fn(&Point)> = Rc::new(move |p2: &Point| {
            slot.wake(p2, ());
        });
        *pid.state.passive.borrow_mut() = Some(wake);
        trace!("passivate");
    })
}

/// Suspend until `signal` fires; the first firing resumes the process
/// with the value and unsubscribes the handler.
pub fn await_signal<T: Clone + 'static>(signal: &Signal<T>) -> Process<T> {
    let signal = signal.clone();
    Process::new(move |_p, params| {
        let pid = params.aux.pid.clone();
        let slot = Suspension::park(params);
        let handle: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let sub = signal.subscribe({
            let slot = slot.clone();
            let handle = Rc::clone(&handle);
            move |p2, value: &T| {
                if let Some(sub) = handle.borrow_mut().take() {
                    sub.dispose();
                }
                slot.wake(p2, value.clone());
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
    })
}

/// Run child processes side by side; completes when every child has
/// finished, yielding their values in order. The first failure cancels
/// the remaining children and propagates once they have wound down.
/// Children inherit cancellation from the parent.
pub fn parallel<T: 'static>(children: Vec<Process<T>>) -> Process<Vec<T>> {
    Process::new(move |p, params: ContParams<Vec<T>>| {
        let count = children.len();
        if count == 0 {
            params.resume(p, Vec::new());
            return;
        }
        let parent = params.aux.pid.clone();
        let slot = Suspension::park(params);
        let csub = parent.cancel_signal().subscribe({
            let slot = slot.clone();
            move |p2, _| {
                slot.cancel(p2);
            }
        });
        slot.attach(csub);

        let ids: Vec<ProcessId> = (0..count).map(|_| ProcessId::new()).collect();
        for id in &ids {
            link(&parent, id, Linkage::CancelChildAfterParent);
        }
        let results: Rc<RefCell<Vec<Option<T>>>> =
            Rc::new(RefCell::new((0..count).map(|_| None).collect()));
        let remaining = Rc::new(Cell::new(count));
        let first_failure: Rc<RefCell<Option<Failure>>> = Rc::new(RefCell::new(None));

        for (index, child) in children.into_iter().enumerate() {
            let pid = ids[index].clone();
            let siblings = ids.clone();
            let results = Rc::clone(&results);
            let remaining = Rc::clone(&remaining);
            let first_failure = Rc::clone(&first_failure);
            let slot = slot.clone();
            start_with_outcome(p, pid, child, move |p2, outcome| {
                match outcome {
                    Outcome::Completed(value) => results.borrow_mut()[index] = Some(value),
                    Outcome::Failed(failure) => {
                        let fresh = first_failure.borrow().is_none();
                        if fresh {
                            *first_failure.borrow_mut() = Some(failure);
                            for (i, sibling) in siblings.iter().enumerate() {
                                if i != index {
                                    cancel_process(p2, sibling);
                                }
                            }
                        }
                    }
                    Outcome::Cancelled => {}
                }
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    if let Some(failure) = first_failure.borrow_mut().take() {
                        slot.fail(p2, failure);
                    } else {
                        let values: Option<Vec<T>> = results.borrow_mut().drain(..).collect();
                        match values {
                            Some(values) => {
                                slot.wake(p2, values);
                            }
                            None => {
                                slot.fail(
                                    p2,
                                    Failure::new("parallel: a child was cancelled externally"),
                                );
                            }
                        }
                    }
                }
            });
        }
    })
}

/// Run two processes side by side, yielding both values.
pub fn par_zip<A: 'static, B: 'static>(pa: Process<A>, pb: Process<B>) -> Process<(A, B)> {
    Process::new(move |p, params: ContParams<(A, B)>| {
        let parent = params.aux.pid.clone();
        let slot = Suspension::park(params);
        let csub = parent.cancel_signal().subscribe({
            let slot = slot.clone();
            move |p2, _| {
                slot.cancel(p2);
            }
        });
        slot.attach(csub);

        let left = ProcessId::new();
        let right = ProcessId::new();
        link(&parent, &left, Linkage::CancelChildAfterParent);
        link(&parent, &right, Linkage::CancelChildAfterParent);

        let a_slot: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
        let b_slot: Rc<RefCell<Option<B>>> = Rc::new(RefCell::new(None));
        let remaining = Rc::new(Cell::new(2usize));
        let first_failure: Rc<RefCell<Option<Failure>>> = Rc::new(RefCell::new(None));

        let settle = {
            let a_slot = Rc::clone(&a_slot);
            let b_slot = Rc::clone(&b_slot);
            let remaining = Rc::clone(&remaining);
            let first_failure = Rc::clone(&first_failure);
            let slot = slot.clone();
            Rc::new(move |p2: &Point| {
                remaining.set(remaining.get() - 1);
                if remaining.get() > 0 {
                    return;
                }
                if let Some(failure) = first_failure.borrow_mut().take() {
                    slot.fail(p2, failure);
                    return;
                }
                let pair = (a_slot.borrow_mut().take(), b_slot.borrow_mut().take());
                match pair {
                    (Some(a), Some(b)) => {
                        slot.wake(p2, (a, b));
                    }
                    _ => {
                        slot.fail(p2, Failure::new("par_zip: a side was cancelled externally"));
                    }
                }
            })
        };

        {
            let a_slot = Rc::clone(&a_slot);
            let first_failure = Rc::clone(&first_failure);
            let other = right.clone();
            let settle = Rc::clone(&settle);
            start_with_outcome(p, left.clone(), pa, move |p2, outcome| {
                match outcome {
                    Outcome::Completed(value) => *a_slot.borrow_mut() = Some(value),
                    Outcome::Failed(failure) => {
                        if first_failure.borrow().is_none() {
                            *first_failure.borrow_mut() = Some(failure);
                            cancel_process(p2, &other);
                        }
                    }
                    Outcome::Cancelled => {}
                }
                settle(p2);
            });
        }
        {
            let b_slot = Rc::clone(&b_slot);
            let first_failure = Rc::clone(&first_failure);
            let other = left.clone();
            start_with_outcome(p, right.clone(), pb, move |p2, outcome| {
                match outcome {
                    Outcome::Completed(value) => *b_slot.borrow_mut() = Some(value),
                    Outcome::Failed(failure) => {
                        if first_failure.borrow().is_none() {
                            *first_failure.borrow_mut() = Some(failure);
                            cancel_process(p2, &other);
                        }
                    }
                    Outcome::Cancelled => {}
                }
                settle(p2);
            });
        }
    })
}

/// Race `body` against a timer of length `dt`: whichever finishes first
/// wins and the loser is cancelled. Yields `None` on timeout. Fatal on a
/// negative duration.
pub fn timeout<T: 'static>(dt: f64, body: Process<T>) -> Process<Option<T>> {
    Process::new(move |p, params: ContParams<Option<T>>| {
        if dt < 0.0 {
            panic!("timeout: negative duration {dt}");
        }
        let parent = params.aux.pid.clone();
        let slot = Suspension::park(params);
        let csub = parent.cancel_signal().subscribe({
            let slot = slot.clone();
            move |p2, _| {
                slot.cancel(p2);
            }
        });
        slot.attach(csub);

        let child = ProcessId::new();
        link(&parent, &child, Linkage::CancelChildAfterParent);
        let decided = Rc::new(Cell::new(false));
        {
            let slot = slot.clone();
            let decided = Rc::clone(&decided);
            start_with_outcome(p, child.clone(), body, move |p2, outcome| {
                if decided.replace(true) {
                    return;
                }
                match outcome {
                    Outcome::Completed(value) => {
                        slot.wake(p2, Some(value));
                    }
                    Outcome::Failed(failure) => {
                        slot.fail(p2, failure);
                    }
                    Outcome::Cancelled => {}
                }
            });
        }
        p.run.queue.enqueue(p.time + dt, {
            move |p2| {
                if decided.replace(true) {
                    return;
                }
                cancel_process(p2, &child);
                slot.wake(p2, None);
            }
        });
    })
}
