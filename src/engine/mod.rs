pub mod continuation;
pub mod core;

pub use self::continuation::ContinuationError;
pub use self::core::{BeforeCall, FaultDecision, FaultEngine};
