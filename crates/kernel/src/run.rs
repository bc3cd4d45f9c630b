//! Simulation runs and the drive loop.
//!
//! A [`Run`] owns the event queue and all per-run state; every [`Point`]
//! carries a shared handle back to its run. Driving a run means draining
//! scheduled activity up to the stop point and evaluating the model's
//! top-level dynamics there.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::dynamics::Dynamics;
use crate::error::Failure;
use crate::event::EventQueue;
use crate::point::Point;
use crate::rng::RngStream;
use crate::specs::Specs;

/// One simulation run.
pub struct Run {
    pub specs: Specs,
    /// Index of this run within its series.
    pub run_index: usize,
    /// Size of the series this run belongs to.
    pub run_count: usize,
    pub queue: EventQueue,
    pub(crate) rng: RefCell<RngStream>,
    abort: RefCell<Option<Failure>>,
    this: Weak<Run>,
}

impl Run {
    /// A standalone run.
    pub fn new(specs: Specs) -> Rc<Run> {
        Self::with_index(specs, 0, 1)
    }

    /// One run of a series.
    pub fn with_index(specs: Specs, run_index: usize, run_count: usize) -> Rc<Run> {
        Rc::new_cyclic(|this| Run {
            specs,
            run_index,
            run_count,
            queue: EventQueue::new(&specs),
            rng: RefCell::new(RngStream::for_run(run_index)),
            abort: RefCell::new(None),
            this: this.clone(),
        })
    }

    /// A shared handle to this run.
    pub fn handle(&self) -> Rc<Run> {
        self.this.upgrade().expect("run: handle outlived the run")
    }

    /// The grid point at the start of the run.
    pub fn start_point(&self) -> Point {
        Point::at(&self.handle(), 0, 0)
    }

    /// The grid point at the end of the run.
    pub fn stop_point(&self) -> Point {
        Point::at(&self.handle(), self.specs.iteration_count(), 0)
    }

    /// Schedule an event during model assembly.
    pub fn schedule(&self, t: f64, action: impl FnOnce(&Point) + 'static) {
        self.queue.enqueue(t, action);
    }

    /// Record an unhandled failure; the drive loop stops at the next
    /// event boundary. The first failure wins.
    pub(crate) fn record_abort(&self, failure: Failure) {
        let mut slot = self.abort.borrow_mut();
        if slot.is_none() {
            *slot = Some(failure);
        }
    }

    pub(crate) fn aborted(&self) -> bool {
        self.abort.borrow().is_some()
    }

    fn take_abort(&self) -> Option<Failure> {
        self.abort.borrow_mut().take()
    }
}

/// Execute one run and return the model's top-level dynamics evaluated
/// at the stop point.
///
/// Events already scheduled are drained first; events the evaluation
/// itself schedules are flushed before returning. An unhandled process
/// failure aborts the run and surfaces as `Err`.
pub fn run_simulation<T: 'static>(
    specs: Specs,
    model: impl FnOnce(&Rc<Run>) -> Dynamics<T>,
) -> Result<T, Failure> {
    let run = Run::new(specs);
    drive(&run, model)
}

/// Execute `count` independent runs sharing `specs`, each seeing its own
/// `run_index`. Runs fan out across threads; every run is still strictly
/// single-threaded inside.
pub fn run_simulation_series<T, F>(specs: Specs, count: usize, model: F) -> Result<Vec<T>, Failure>
where
    T: Send + 'static,
    F: Fn(&Rc<Run>) -> Dynamics<T> + Send + Sync,
{
    (0..count)
        .into_par_iter()
        .map(|run_index| {
            let run = Run::with_index(specs, run_index, count);
            drive(&run, &model)
        })
        .collect()
}

fn drive<T: 'static>(run: &Rc<Run>, model: impl FnOnce(&Rc<Run>) -> Dynamics<T>) -> Result<T, Failure> {
    info!(
        run_index = run.run_index,
        stop = run.specs.stop_time,
        "run starting"
    );
    let dynamics = model(run);
    let stop = run.stop_point();
    run.queue.drain(&stop, true);
    if let Some(failure) = run.take_abort() {
        return Err(failure);
    }
    let value = dynamics.call(&stop);
    run.queue.drain(&stop, true);
    if let Some(failure) = run.take_abort() {
        return Err(failure);
    }
    debug!(run_index = run.run_index, "run finished");
    Ok(value)
}
