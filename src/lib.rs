#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(deprecated)]

//!
//! Faultline-Core is a fault-injection decision engine for testing
//! distributed request graphs.
//!
//! The engine gives every outgoing call a deterministic execution index that
//! survives re-execution, tracks causal order with vector clocks, matches
//! calls against an ordered fault catalog, and drives a bounded exploration
//! loop that injects exactly one new (call site, fault) pair per iteration.
//!
//! ```text
//!  instrumentation ──before_call──▶ FaultEngine ──▶ ExecutionIndexer ──▶ ContextRegistry
//!        ▲                              │
//!        │                              ├──▶ FaultCatalog (discover candidates)
//!        └────── FaultDecision ◀────────┴──▶ SearchController (pick this iteration's pair)
//!
//!  after_call ──▶ RedundancyAnalyzer / transformer scheduling ──▶ TestExecutionReport
//! ```

// Shared identifiers and configuration enums.
pub mod types;

// Call sites, payloads and outcomes exchanged with instrumentation.
pub mod primitives;

pub use primitives::*;

pub mod error;
pub mod config;

// Causal ordering.
pub mod time;

// Per-request storage and execution indices.
pub mod context;
pub mod dei;

pub mod catalog;
pub mod scope;
pub mod search;
pub mod analysis;
pub mod report;

pub mod engine;

#[cfg(feature = "tracing-subscriber")]
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::{BeforeCall, FaultDecision, FaultEngine};
pub use error::EngineError;
