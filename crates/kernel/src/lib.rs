//! Cadence simulation kernel
//!
//! A hybrid simulation substrate: deterministic discrete-event
//! scheduling, continuous-time integration on a shared grid, and
//! cooperative processes coordinating through resources, queues, and
//! signals. Everything inside one run is strictly single-threaded;
//! "parallel" processes are interleaved coroutines sharing the same
//! instant of simulated time.

pub mod dynamics;
pub mod error;
pub mod event;
pub mod observable;
pub mod ode;
pub mod point;
pub mod process;
pub mod processor;
pub mod queues;
pub mod resource;
pub mod rng;
pub mod run;
pub mod signal;
pub mod specs;
pub mod stats;
pub mod strategy;
pub mod stream;

pub use dynamics::{Dynamics, time};
pub use error::Failure;
pub use event::{EventMode, EventQueue, run_event};
pub use observable::{Observable, ObservableCell};
pub use ode::{Integ, integ, integ_const};
pub use point::{DISPATCH_PHASE, Point};
pub use process::{
    Linkage, Process, ProcessId, await_signal, cancel_process, enqueue_process, hold, interrupt,
    par_zip, parallel, passivate, reactivate, run_process, run_process_using, schedule_process,
    schedule_process_using, spawn, spawn_using, timeout,
};
pub use processor::{Either, Processor};
pub use queues::{Fifo, Queue};
pub use resource::Resource;
pub use rng::RngStream;
pub use run::{Run, run_simulation, run_simulation_series};
pub use signal::{Signal, SignalSource, Subscription};
pub use specs::{Method, Specs};
pub use stats::SamplingStats;
pub use strategy::Strategy;
pub use stream::{MemoStream, Stream};
