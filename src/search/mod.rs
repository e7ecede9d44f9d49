//! Iteration sequencing and fault-candidate selection.

pub mod controller;

pub use controller::{Candidate, IterationPlan, SearchController, SearchState};
