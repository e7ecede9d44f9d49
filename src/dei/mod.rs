//! Distributed execution indices: deterministic identities for outgoing calls.

pub mod index;
pub mod indexer;

pub use index::{ExecutionIndex, Frame, FrameKey};
pub use indexer::ExecutionIndexer;
