//! Execution index values.
//!
//! An [`ExecutionIndex`] is a stack of frames, one per nested outgoing call.
//! Each frame names the call site through a [`FrameKey`] and counts how many
//! times that key already occurred under the same prefix. The canonical form
//! is the JSON array `[["V1-<scope>-<signature>-<ancestry>",n],...]`.

use crate::error::ParseError;
use std::fmt;

const KEY_VERSION: &str = "V1";

/// Identity of one call site under a given scope and causal ancestry.
///
/// Components are already encoded (digested or raw) when stored here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    /// Fault-scope token, empty outside any counted scope.
    pub scope: String,
    pub signature: String,
    /// Encoded origin clock of the request that issued the call.
    pub ancestry: String,
}

impl FrameKey {
    /// Builds a key, hashing each component with BLAKE3 when `digest` is set.
    pub fn new(scope: &str, signature: &str, ancestry: &str, digest: bool) -> Self {
        let encode = |component: &str| {
            if digest {
                component_digest(component)
            } else {
                component.to_string()
            }
        };
        FrameKey {
            scope: encode(scope),
            signature: encode(signature),
            ancestry: encode(ancestry),
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            KEY_VERSION,
            escape(&self.scope),
            escape(&self.signature),
            escape(&self.ancestry)
        )
    }

    pub fn decode(text: &str) -> Result<Self, ParseError> {
        let mut parts = text.split('-');
        let version = parts.next().unwrap_or_default();
        if version != KEY_VERSION {
            return Err(ParseError::Index(format!("unsupported frame key version `{version}`")));
        }
        let components: Vec<&str> = parts.collect();
        match components.as_slice() {
            [scope, signature, ancestry] => Ok(FrameKey {
                scope: unescape(scope)?,
                signature: unescape(signature)?,
                ancestry: unescape(ancestry)?,
            }),
            _ => Err(ParseError::Index(format!("frame key `{text}` must have three components"))),
        }
    }
}

/// Short BLAKE3 hex digest of an index component. The empty component
/// stays empty so unscoped keys read naturally.
pub fn component_digest(component: &str) -> String {
    if component.is_empty() {
        return String::new();
    }
    let hash = blake3::hash(component.as_bytes());
    hash.to_hex()[..16].to_string()
}

// Raw components may contain the separator; keep it out of the key text.
fn escape(component: &str) -> String {
    component.replace('%', "%25").replace('-', "%2D")
}

fn unescape(component: &str) -> Result<String, ParseError> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        match rest.get(pos + 1..pos + 3) {
            Some("25") => out.push('%'),
            Some("2D") => out.push('-'),
            _ => return Err(ParseError::Index(format!("bad escape in `{component}`"))),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frame {
    pub key: FrameKey,
    /// 1-based occurrence of `key` under the preceding frames.
    pub occurrence: u64,
}

/// Deterministic identity of one dynamic call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionIndex {
    frames: Vec<Frame>,
}

impl ExecutionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        ExecutionIndex { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Canonical flat string; equal strings mean equal indices.
    pub fn to_canonical_string(&self) -> String {
        let rows: Vec<serde_json::Value> = self
            .frames
            .iter()
            .map(|f| serde_json::json!([f.key.encode(), f.occurrence]))
            .collect();
        serde_json::Value::Array(rows).to_string()
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let rows: Vec<(String, u64)> = serde_json::from_str(text)?;
        let frames = rows
            .into_iter()
            .map(|(key, occurrence)| {
                if occurrence == 0 {
                    return Err(ParseError::Index("occurrence counters start at 1".into()));
                }
                Ok(Frame { key: FrameKey::decode(&key)?, occurrence })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExecutionIndex { frames })
    }

    /// The innermost call site's signature component, ignoring scope,
    /// occurrence and ancestry.
    pub fn signature_projection(&self) -> Option<&str> {
        self.last().map(|f| f.key.signature.as_str())
    }

    /// Scope and signature of the innermost frame.
    pub fn scoped_signature_projection(&self) -> Option<String> {
        self.last().map(|f| format!("{}-{}", escape(&f.key.scope), escape(&f.key.signature)))
    }
}

impl fmt::Display for ExecutionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl serde::Serialize for ExecutionIndex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> serde::Deserialize<'de> for ExecutionIndex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        ExecutionIndex::parse(&text).map_err(serde::de::Error::custom)
    }
}
