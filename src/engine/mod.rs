//! The selection-and-decision engine.
//!
//! [`combiner::DecisionCombiner::decide`] is a request-in, outcome-out
//! function over a snapshot; committing the outcome is left to the caller.

pub mod combiner;
pub mod context;
