//! Interruption of threads blocked on edges.

mod token;

pub use token::{InterruptCallback, InterruptToken};
