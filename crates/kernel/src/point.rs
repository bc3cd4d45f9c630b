//! Instantaneous coordinates within a run.

use std::fmt;
use std::rc::Rc;

use crate::run::Run;
use crate::specs::Specs;

/// Phase index marking an off-grid event-dispatch instant.
pub const DISPATCH_PHASE: i32 = -1;

/// An instantaneous coordinate in a simulation run: a time together with
/// the integration-grid position it corresponds to.
#[derive(Clone)]
pub struct Point {
    /// The run this point belongs to.
    pub run: Rc<Run>,
    /// Simulated time.
    pub time: f64,
    /// Integration-grid iteration containing `time`.
    pub iteration: i64,
    /// Integration phase, or [`DISPATCH_PHASE`] when off-grid.
    pub phase: i32,
}

impl Point {
    pub fn specs(&self) -> &Specs {
        &self.run.specs
    }

    /// The grid point at `(iteration, phase)`.
    pub(crate) fn at(run: &Rc<Run>, iteration: i64, phase: i32) -> Self {
        let time = run.specs.basic_time(iteration, phase);
        Self {
            run: Rc::clone(run),
            time,
            iteration,
            phase,
        }
    }

    /// An off-grid dispatch point at an arbitrary time.
    pub(crate) fn dispatch(run: &Rc<Run>, time: f64) -> Self {
        Self {
            run: Rc::clone(run),
            time,
            iteration: run.specs.iteration_at(time),
            phase: DISPATCH_PHASE,
        }
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Point")
            .field("time", &self.time)
            .field("iteration", &self.iteration)
            .field("phase", &self.phase)
            .finish()
    }
}
