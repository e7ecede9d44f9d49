//!
//! Defines error types for the fault-injection engine.
//!
//! The split follows who is at fault: `ConfigError` for bad catalogs and
//! settings (rejected at load time), `FaultError` for an injection that could
//! not be realised at a call, `ProtocolError` for misuse of the decision
//! protocol by the instrumentation layer, and `EngineError` wrapping all of
//! them plus the fatal baseline failure.

use crate::types::{RequestId, ValueKind};

/// Errors raised while building a fault catalog or loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A rule's method-name pattern failed to compile.
    #[error("Rule `{rule}` has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
    /// A rule carries no pattern at all.
    #[error("Rule `{0}` is missing a pattern")]
    MissingPattern(String),
    /// A byzantine fault names a value type the engine does not know.
    #[error("Rule `{rule}` uses unknown fault type `{token}`")]
    UnknownFaultType { rule: String, token: String },
    /// A transformer fault names a transformer outside the closed set.
    #[error("Rule `{rule}` uses unknown transformer `{token}`")]
    UnknownTransformer { rule: String, token: String },
    /// The declared byzantine value cannot be represented in its kind.
    #[error("Rule `{rule}` declares a {kind} byzantine value that is not supported: {value}")]
    UnsupportedByzantineValue {
        rule: String,
        kind: ValueKind,
        value: String,
    },
    /// Structurally malformed file content.
    #[error("Malformed configuration: {0}")]
    Malformed(String),
    #[error("Configuration JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors realising a chosen fault at the call site.
///
/// Recorded against the current iteration only; exploration continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultError {
    /// A byzantine value could not be cast to the call's declared type.
    #[error("Cannot cast byzantine {from} value to {expected}")]
    Cast { from: ValueKind, expected: ValueKind },
    /// A transformer was handed a payload of the wrong kind.
    #[error("Transformer `{transformer}` expects a {expected} payload, got {actual}")]
    PayloadMismatch {
        transformer: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    /// The reference payload offers nothing to mutate at the requested step.
    #[error("Transformer `{transformer}` has no mutation at step {step} for this payload")]
    EmptyPayload { transformer: String, step: usize },
}

/// Internal-consistency violations of the decision protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown request id {0}")]
    UnknownRequest(RequestId),
    #[error("Request id {0} is already active")]
    DuplicateRequest(RequestId),
    #[error("No iteration is active; call begin_iteration() first")]
    NoActiveIteration,
    #[error("An iteration is already active")]
    IterationActive,
    #[error("after_call for {request} reported index {reported}, but the innermost open call is {expected}")]
    OutOfOrder {
        request: RequestId,
        reported: String,
        expected: String,
    },
    #[error("after_call for {0} with no open call")]
    NoOpenCall(RequestId),
    #[error("end_request for {request} with {open} call(s) still open")]
    OpenCalls { request: RequestId, open: usize },
    #[error("Scope exit without a matching scope entry")]
    ScopeUnderflow,
    #[error("Engine state lock poisoned")]
    Poisoned,
}

/// Errors parsing serialized clocks and indices.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed vector clock: {0}")]
    Clock(String),
    #[error("Malformed execution index: {0}")]
    Index(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Fault-injection engine protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Fault could not be injected: {0}")]
    Fault(#[from] FaultError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// The reference iteration failed with no fault injected.
    #[error("Reference iteration failed without any injected fault: {0}")]
    BaselineFailed(String),
}

impl EngineError {
    /// True when the engine itself, not the program under test, is broken.
    pub fn is_engine_fault(&self) -> bool {
        matches!(self, EngineError::Protocol(_))
    }
}
