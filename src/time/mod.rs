//! Logical-time utilities. Vector clocks live in `time::vector`.

pub mod vector;

// Re-export for convenience
pub use vector::*;
