//! Testing utilities for procflow pipelines.
//!
//! Ready-made processes for building test graphs: sources, sinks,
//! pass-throughs, and processes that fail, panic or block on demand.

mod mocks;

pub use mocks::{
    Adder, Collector, FailAfter, GatedPass, MultiPush, Multiplier, NumberSource, PassThrough,
    ScriptedSource,
};
