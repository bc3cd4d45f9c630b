//! Time-varying computations over the integration grid.
//!
//! A [`Dynamics`] is a function of a [`Point`]. Memoization pins a
//! dynamics to the grid: values are computed once per `(iteration,
//! phase)` slot, filling sequentially from the start of the run so a
//! slot can depend on every earlier slot.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::point::Point;

/// A computation evaluated at a point of a run.
pub struct Dynamics<T> {
    f: Rc<dyn Fn(&Point) -> T>,
}

impl<T> Clone for Dynamics<T> {
    fn clone(&self) -> Self {
        Self { f: Rc::clone(&self.f) }
    }
}

impl<T: 'static> Dynamics<T> {
    pub fn new(f: impl Fn(&Point) -> T + 'static) -> Self {
        Self { f: Rc::new(f) }
    }

    /// Evaluate at `p`.
    pub fn call(&self, p: &Point) -> T {
        (self.f)(p)
    }

    pub fn constant(value: T) -> Self
    where
        T: Clone,
    {
        Dynamics::new(move |_| value.clone())
    }

    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Dynamics<U> {
        let inner = self.clone();
        Dynamics::new(move |p| f(inner.call(p)))
    }

    pub fn zip_with<U: 'static, V: 'static>(
        &self,
        other: &Dynamics<U>,
        f: impl Fn(T, U) -> V + 'static,
    ) -> Dynamics<V> {
        let a = self.clone();
        let b = other.clone();
        Dynamics::new(move |p| f(a.call(p), b.call(p)))
    }

    /// Cache values on the integration grid, filling sequentially from
    /// the start of the run. Off-grid reads take the value at the
    /// iteration containing the point's time.
    pub fn memo(&self) -> Dynamics<T>
    where
        T: Clone,
    {
        let cell = MemoCell::new(self.clone());
        Dynamics::new(move |p| cell.read_grid(p))
    }
}

impl Dynamics<f64> {
    /// Like [`Dynamics::memo`], but off-grid reads interpolate linearly
    /// between the two neighbouring grid iterations.
    pub fn memo_interpolate(&self) -> Dynamics<f64> {
        let cell = MemoCell::new(self.clone());
        Dynamics::new(move |p| {
            if p.phase >= 0 {
                return cell.read_grid(p);
            }
            let specs = p.run.specs;
            let i = specs.iteration_at(p.time);
            let t0 = specs.basic_time(i, 0);
            let y0 = cell.read(&p.run, i, 0);
            if i >= specs.iteration_count() || p.time <= t0 {
                return y0;
            }
            let t1 = specs.basic_time(i + 1, 0);
            let y1 = cell.read(&p.run, i + 1, 0);
            y0 + (y1 - y0) * (p.time - t0) / (t1 - t0)
        })
    }
}

/// Simulated time as a dynamics.
pub fn time() -> Dynamics<f64> {
    Dynamics::new(|p| p.time)
}

struct MemoCell<T> {
    source: Dynamics<T>,
    values: RefCell<Vec<Option<T>>>,
    cursor: Cell<usize>,
}

impl<T: Clone + 'static> MemoCell<T> {
    fn new(source: Dynamics<T>) -> Self {
        Self {
            source,
            values: RefCell::new(Vec::new()),
            cursor: Cell::new(0),
        }
    }

    fn read_grid(&self, p: &Point) -> T {
        let (iteration, phase) = if p.phase >= 0 {
            (p.iteration, p.phase)
        } else {
            (p.run.specs.iteration_at(p.time), 0)
        };
        self.read(&p.run, iteration, phase)
    }

    fn read(&self, run: &Rc<crate::run::Run>, iteration: i64, phase: i32) -> T {
        let phases = run.specs.method.phase_count() as i64;
        let target = (iteration * phases + phase as i64) as usize;
        {
            let mut values = self.values.borrow_mut();
            if values.len() <= target {
                values.resize(target + 1, None);
            }
        }
        // Sequential fill: every slot may read any earlier slot, so no
        // borrow is held across a source evaluation.
        while self.cursor.get() <= target {
            let k = self.cursor.get();
            let it = k as i64 / phases;
            let ph = (k as i64 % phases) as i32;
            let value = self.source.call(&Point::at(run, it, ph));
            self.values.borrow_mut()[k] = Some(value);
            self.cursor.set(k + 1);
        }
        self.values.borrow()[target]
            .clone()
            .expect("memo: slot behind the cursor is empty")
    }
}
