//! Closed set of payload transformers.
//!
//! A transformer is applied step by step to the reference payload recorded
//! for a call site. Step `n` yields one mutated payload and reports whether
//! step `n + 1` exists, which bounds the lazy sequence the search controller
//! explores.

use crate::error::FaultError;
use crate::primitives::{Mutation, Payload};
use crate::types::ValueKind;

const PRINTABLE_FIRST: u32 = 33; // '!'
const PRINTABLE_LAST: u32 = 126; // '~'

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformerKind {
    /// Replaces the character at position `step` with a different printable one.
    StringChars,
    /// Flips bit `step` of the byte payload, least significant bit first.
    BitInBytes,
    /// Flips a `"true"`/`"false"` string once.
    BooleanString,
}

impl TransformerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransformerKind::StringChars => "string_chars",
            TransformerKind::BitInBytes => "bit_in_bytes",
            TransformerKind::BooleanString => "boolean_string",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "string_chars" => Some(TransformerKind::StringChars),
            "bit_in_bytes" => Some(TransformerKind::BitInBytes),
            "boolean_string" => Some(TransformerKind::BooleanString),
            _ => None,
        }
    }

    /// Payload kind the transformer operates on.
    pub fn payload_kind(&self) -> ValueKind {
        match self {
            TransformerKind::StringChars | TransformerKind::BooleanString => ValueKind::String,
            TransformerKind::BitInBytes => ValueKind::Bytes,
        }
    }

    /// Whether `reference` can be transformed at all.
    pub fn accepts(&self, reference: &Payload) -> bool {
        reference.kind() == Some(self.payload_kind())
    }

    /// Produces mutation number `step` (0-based) of `reference`.
    pub fn apply(&self, reference: &Payload, step: usize) -> Result<Mutation, FaultError> {
        match (self, reference) {
            (TransformerKind::StringChars, Payload::Text(s)) => self.mutate_chars(s, step),
            (TransformerKind::BitInBytes, Payload::Bytes(b)) => self.flip_bit(b, step),
            (TransformerKind::BooleanString, Payload::Text(s)) => self.flip_boolean(s, step),
            (_, other) => Err(FaultError::PayloadMismatch {
                transformer: self.name().to_string(),
                expected: self.payload_kind(),
                actual: other.kind().unwrap_or(self.payload_kind()),
            }),
        }
    }

    fn exhausted(&self, step: usize) -> FaultError {
        FaultError::EmptyPayload { transformer: self.name().to_string(), step }
    }

    fn mutate_chars(&self, s: &str, step: usize) -> Result<Mutation, FaultError> {
        let mut chars: Vec<char> = s.chars().collect();
        let len = chars.len();
        let slot = chars.get_mut(step).ok_or_else(|| self.exhausted(step))?;
        *slot = next_printable(*slot);
        Ok(Mutation {
            value: Payload::Text(chars.into_iter().collect()),
            has_next: step + 1 < len,
        })
    }

    fn flip_bit(&self, bytes: &[u8], step: usize) -> Result<Mutation, FaultError> {
        let bits = bytes.len() * 8;
        if step >= bits {
            return Err(self.exhausted(step));
        }
        let mut out = bytes.to_vec();
        out[step / 8] ^= 1 << (step % 8);
        Ok(Mutation { value: Payload::Bytes(out), has_next: step + 1 < bits })
    }

    fn flip_boolean(&self, s: &str, step: usize) -> Result<Mutation, FaultError> {
        if step > 0 {
            return Err(self.exhausted(step));
        }
        let flipped = match s.to_ascii_lowercase().as_str() {
            "true" => "false",
            "false" => "true",
            _ => {
                return Err(FaultError::PayloadMismatch {
                    transformer: self.name().to_string(),
                    expected: ValueKind::Boolean,
                    actual: ValueKind::String,
                })
            }
        };
        Ok(Mutation { value: Payload::Text(flipped.to_string()), has_next: false })
    }
}

// Next printable ASCII character, wrapping '~' to '!'. Anything outside
// the printable range becomes '!'.
fn next_printable(c: char) -> char {
    let code = c as u32;
    let next = if (PRINTABLE_FIRST..PRINTABLE_LAST).contains(&code) {
        code + 1
    } else {
        PRINTABLE_FIRST
    };
    char::from_u32(next).unwrap_or('!')
}
