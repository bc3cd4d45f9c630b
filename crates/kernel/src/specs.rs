//! Run parameters and the integration grid.
//!
//! A run covers `[start_time, stop_time]` in `iteration_count` steps of
//! width `dt`; each iteration is subdivided into the phases of the chosen
//! integration method.

use serde::{Deserialize, Serialize};

/// Numerical integration method for continuous-time dynamics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Method {
    /// First-order Euler rule, one phase per iteration.
    #[default]
    Euler,
    /// Second-order Heun rule, two phases per iteration.
    RK2,
    /// Classic fourth-order Runge-Kutta rule, four phases per iteration.
    RK4,
}

impl Method {
    /// Number of integration phases inside one grid iteration.
    pub fn phase_count(self) -> i32 {
        match self {
            Method::Euler => 1,
            Method::RK2 => 2,
            Method::RK4 => 4,
        }
    }

    /// Time offset of `phase` relative to the start of its iteration.
    pub(crate) fn phase_offset(self, dt: f64, phase: i32) -> f64 {
        match (self, phase) {
            (Method::Euler, 0) => 0.0,
            (Method::RK2, 0) => 0.0,
            (Method::RK2, 1) => dt,
            (Method::RK4, 0) => 0.0,
            (Method::RK4, 1) => dt / 2.0,
            (Method::RK4, 2) => dt / 2.0,
            (Method::RK4, 3) => dt,
            _ => panic!("phase_offset: phase {phase} is out of range for {self:?}"),
        }
    }
}

/// Immutable parameters of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Specs {
    pub start_time: f64,
    pub stop_time: f64,
    pub dt: f64,
    pub method: Method,
}

impl Specs {
    /// Validated constructor: `dt` must be positive and the time interval
    /// must not be reversed.
    pub fn new(start_time: f64, stop_time: f64, dt: f64, method: Method) -> Self {
        if !(dt > 0.0) {
            panic!("Specs::new: dt must be positive, got {dt}");
        }
        if stop_time < start_time {
            panic!("Specs::new: stop_time {stop_time} precedes start_time {start_time}");
        }
        Self {
            start_time,
            stop_time,
            dt,
            method,
        }
    }

    /// Index of the last grid iteration.
    pub fn iteration_count(&self) -> i64 {
        ((self.stop_time - self.start_time) / self.dt).round() as i64
    }

    /// Basic time of `(iteration, phase)` on the integration grid.
    pub fn basic_time(&self, iteration: i64, phase: i32) -> f64 {
        self.start_time + iteration as f64 * self.dt + self.method.phase_offset(self.dt, phase)
    }

    /// Grid iteration containing time `t`, clamped to the run interval.
    pub fn iteration_at(&self, t: f64) -> i64 {
        let raw = ((t - self.start_time) / self.dt).floor() as i64;
        raw.clamp(0, self.iteration_count())
    }
}
