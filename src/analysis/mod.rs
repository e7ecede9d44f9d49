//! Post-hoc analyses over one iteration's call history.

pub mod redundancy;

pub use redundancy::{RedundancyAnalyzer, RedundancyWarning};
