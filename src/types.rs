//! Shared value types used across the engine's components.
//!
//! Types that form the body of an execution record (call sites, payloads,
//! outcomes) live in `primitives.rs`; this file holds identifiers and the
//! small enums selected by configuration.

use std::fmt;

/// Identifier of one logical request.
///
/// Generated at the start of a logical request and propagated to every
/// child task spawned on its behalf.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        RequestId(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node (service) identifier used as a vector-clock key.
pub type NodeId = String;

/// Declared kind of a value flowing through a call: the return type an
/// injected byzantine value must be cast to, or the payload type a
/// transformer operates on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Bytes,
    Integer,
    Boolean,
}

impl ValueKind {
    /// Parses the fault-type token used in catalog files.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "string" | "str" => Some(ValueKind::String),
            "bytes" | "byte_array" | "bytearr" => Some(ValueKind::Bytes),
            "integer" | "int" | "long" => Some(ValueKind::Integer),
            "boolean" | "bool" => Some(ValueKind::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

/// Order in which the search controller consumes fault candidates.
///
/// The strategy only changes the order of exploration, never which
/// candidates are eventually explored within the iteration bound.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// All faults for the first discovered index before moving on.
    #[default]
    BreadthFirst,
    /// Most recently discovered candidate first.
    DepthFirst,
    /// Every fault variant for one target method; other call sites are ignored.
    SingleTarget(String),
}

/// Storage policy of the [`ContextRegistry`](crate::context::ContextRegistry).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePolicy {
    /// One slot per logical request; child tasks inherit through `fork`.
    #[default]
    PerRequest,
    /// A single slot shared by every request id. Only for single-threaded harnesses.
    SharedGlobal,
}
