//! Ordinary differential equation integrators on the run grid.
//!
//! An [`Integ`] cell is wired in two steps so systems of mutually
//! dependent equations can be assembled: allocate every cell first, then
//! patch the derivatives in. Values are memoized per `(iteration, phase)`
//! slot; off-grid reads interpolate linearly between grid iterations.

use std::cell::RefCell;
use std::rc::Rc;

use crate::dynamics::Dynamics;
use crate::point::Point;
use crate::specs::Method;

/// An integrator cell: `value' = derivative`, with a given initial
/// value.
pub struct Integ {
    value: Dynamics<f64>,
    derivative: Rc<RefCell<Option<Dynamics<f64>>>>,
}

/// Allocate an integrator with the given initial value. The derivative
/// must be patched in with [`Integ::set_derivative`] before the first
/// evaluation.
pub fn integ(init: Dynamics<f64>) -> Integ {
    let derivative: Rc<RefCell<Option<Dynamics<f64>>>> = Rc::new(RefCell::new(None));
    let reader: Rc<RefCell<Option<Dynamics<f64>>>> = Rc::new(RefCell::new(None));

    let raw = {
        let derivative = Rc::clone(&derivative);
        let reader = Rc::clone(&reader);
        Dynamics::new(move |p| {
            let diff = derivative
                .borrow()
                .clone()
                .expect("integ: derivative not patched in");
            let value = reader
                .borrow()
                .clone()
                .expect("integ: cell read before allocation finished");
            step(p, &init, &diff, &value)
        })
    };

    let value = raw.memo_interpolate();
    *reader.borrow_mut() = Some(value.clone());
    Integ { value, derivative }
}

/// Allocate an integrator with a constant initial value.
pub fn integ_const(init: f64) -> Integ {
    integ(Dynamics::constant(init))
}

impl Integ {
    /// The integrated value.
    pub fn value(&self) -> Dynamics<f64> {
        self.value.clone()
    }

    /// Patch in the derivative.
    pub fn set_derivative(&self, derivative: Dynamics<f64>) {
        *self.derivative.borrow_mut() = Some(derivative);
    }
}

fn step(p: &Point, init: &Dynamics<f64>, diff: &Dynamics<f64>, value: &Dynamics<f64>) -> f64 {
    let specs = p.run.specs;
    let dt = specs.dt;
    let i = p.iteration;
    let run = &p.run;
    let y = |it: i64, ph: i32| value.call(&Point::at(run, it, ph));
    let f = |it: i64, ph: i32| diff.call(&Point::at(run, it, ph));

    match (specs.method, p.phase) {
        (_, 0) if i == 0 => init.call(p),
        (Method::Euler, 0) => y(i - 1, 0) + dt * f(i - 1, 0),
        (Method::RK2, 0) => {
            let k1 = f(i - 1, 0);
            let k2 = f(i - 1, 1);
            y(i - 1, 0) + dt / 2.0 * (k1 + k2)
        }
        (Method::RK2, 1) => y(i, 0) + dt * f(i, 0),
        (Method::RK4, 0) => {
            let k1 = f(i - 1, 0);
            let k2 = f(i - 1, 1);
            let k3 = f(i - 1, 2);
            let k4 = f(i - 1, 3);
            y(i - 1, 0) + dt / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4)
        }
        (Method::RK4, 1) => y(i, 0) + dt / 2.0 * f(i, 0),
        (Method::RK4, 2) => y(i, 0) + dt / 2.0 * f(i, 1),
        (Method::RK4, 3) => y(i, 0) + dt * f(i, 2),
        (method, phase) => panic!("integ: phase {phase} is not on the {method:?} grid"),
    }
}
