//! Queues: bounded ring buffers and unbounded queues with wait-time
//! statistics.

mod fifo;
mod infinite;

pub use fifo::Fifo;
pub use infinite::Queue;
