//! Fault specifications and byzantine value casting.

use crate::catalog::transformers::TransformerKind;
use crate::error::{ConfigError, FaultError};
use crate::primitives::Payload;
use crate::types::ValueKind;
use std::collections::BTreeMap;
use std::fmt;

/// A concrete value substituted for a call's real return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByzantineValue {
    Null,
    Text(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Integer(i64),
    Boolean(bool),
}

impl ByzantineValue {
    /// Decodes a catalog-file value for the declared `kind`.
    ///
    /// Bytes accept either a string (taken as UTF-8) or an array of octets.
    pub fn from_json(rule: &str, kind: ValueKind, value: &serde_json::Value) -> Result<Self, ConfigError> {
        use serde_json::Value;
        let unsupported = || ConfigError::UnsupportedByzantineValue {
            rule: rule.to_string(),
            kind,
            value: value.to_string(),
        };
        match (kind, value) {
            (_, Value::Null) => Ok(ByzantineValue::Null),
            (ValueKind::String, Value::String(s)) => Ok(ByzantineValue::Text(s.clone())),
            (ValueKind::Bytes, Value::String(s)) => Ok(ByzantineValue::Bytes(s.as_bytes().to_vec())),
            (ValueKind::Bytes, Value::Array(items)) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(ByzantineValue::Bytes)
                .ok_or_else(unsupported),
            (ValueKind::Integer, Value::Number(n)) => n.as_i64().map(ByzantineValue::Integer).ok_or_else(unsupported),
            (ValueKind::Boolean, Value::Bool(b)) => Ok(ByzantineValue::Boolean(*b)),
            _ => Err(unsupported()),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            ByzantineValue::Null => Value::Null,
            ByzantineValue::Text(s) => Value::String(s.clone()),
            ByzantineValue::Bytes(b) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
            ByzantineValue::Integer(i) => Value::from(*i),
            ByzantineValue::Boolean(b) => Value::Bool(*b),
        }
    }

    fn kind(&self) -> Option<ValueKind> {
        match self {
            ByzantineValue::Null => None,
            ByzantineValue::Text(_) => Some(ValueKind::String),
            ByzantineValue::Bytes(_) => Some(ValueKind::Bytes),
            ByzantineValue::Integer(_) => Some(ValueKind::Integer),
            ByzantineValue::Boolean(_) => Some(ValueKind::Boolean),
        }
    }
}

/// One explorable fault for a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "fault")]
pub enum FaultSpec {
    /// Raise the named error with its metadata (e.g. `cause`, `code`).
    Exception {
        name: String,
        metadata: BTreeMap<String, String>,
    },
    /// Replace the return value with `value`, declared as `kind`.
    Byzantine { kind: ValueKind, value: ByzantineValue },
    /// Mutate the real response through a transformer.
    Transformer { transformer: TransformerKind },
}

impl FaultSpec {
    pub fn exception(name: impl Into<String>) -> Self {
        FaultSpec::Exception { name: name.into(), metadata: BTreeMap::new() }
    }

    pub fn is_transformer(&self) -> bool {
        matches!(self, FaultSpec::Transformer { .. })
    }

    /// Casts a byzantine value to the call's declared return type.
    ///
    /// `Null` casts to anything and a string can stand in for bytes; every
    /// other mismatch is a [`FaultError::Cast`].
    pub fn cast_byzantine(kind: ValueKind, value: &ByzantineValue, expected: ValueKind) -> Result<Payload, FaultError> {
        let payload = match (value, expected) {
            (ByzantineValue::Null, _) => Payload::Null,
            (ByzantineValue::Text(s), ValueKind::String) => Payload::Text(s.clone()),
            (ByzantineValue::Text(s), ValueKind::Bytes) => Payload::Bytes(s.as_bytes().to_vec()),
            (ByzantineValue::Bytes(b), ValueKind::Bytes) => Payload::Bytes(b.clone()),
            (ByzantineValue::Integer(i), ValueKind::Integer) => Payload::Integer(*i),
            (ByzantineValue::Boolean(b), ValueKind::Boolean) => Payload::Boolean(*b),
            (v, _) => {
                return Err(FaultError::Cast { from: v.kind().unwrap_or(kind), expected });
            }
        };
        Ok(payload)
    }

    /// The catalog-file JSON form of this fault.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            FaultSpec::Exception { name, metadata } => serde_json::json!({ "name": name, "metadata": metadata }),
            FaultSpec::Byzantine { kind, value } => serde_json::json!({ "type": kind.to_string(), "value": value.to_json() }),
            FaultSpec::Transformer { transformer } => serde_json::json!({ "transformer": transformer.name() }),
        }
    }
}

impl fmt::Display for FaultSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultSpec::Exception { name, metadata } if metadata.is_empty() => write!(f, "exception {name}"),
            FaultSpec::Exception { name, metadata } => {
                let pairs: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "exception {name} [{}]", pairs.join(", "))
            }
            FaultSpec::Byzantine { kind, value } => write!(f, "byzantine {kind} {}", value.to_json()),
            FaultSpec::Transformer { transformer } => write!(f, "transformer {}", transformer.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_per_kind() {
        assert_eq!(
            ByzantineValue::from_json("r", ValueKind::String, &json!("abc")).unwrap(),
            ByzantineValue::Text("abc".into())
        );
        assert_eq!(
            ByzantineValue::from_json("r", ValueKind::Bytes, &json!([1, 2, 255])).unwrap(),
            ByzantineValue::Bytes(vec![1, 2, 255])
        );
        assert_eq!(
            ByzantineValue::from_json("r", ValueKind::Integer, &json!(-7)).unwrap(),
            ByzantineValue::Integer(-7)
        );
        assert_eq!(
            ByzantineValue::from_json("r", ValueKind::Boolean, &json!(null)).unwrap(),
            ByzantineValue::Null
        );
    }

    #[test]
    fn test_from_json_rejects_unsupported_values() {
        for (kind, value) in [
            (ValueKind::Integer, json!("12")),
            (ValueKind::Bytes, json!([256])),
            (ValueKind::Boolean, json!(1)),
            (ValueKind::String, json!({"nested": true})),
        ] {
            let err = ByzantineValue::from_json("rule", kind, &value).unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedByzantineValue { .. }), "{kind} {value}");
        }
    }

    #[test]
    fn test_cast_byzantine() {
        let text = ByzantineValue::Text("hi".into());
        assert_eq!(
            FaultSpec::cast_byzantine(ValueKind::String, &text, ValueKind::Bytes).unwrap(),
            Payload::Bytes(b"hi".to_vec())
        );
        assert_eq!(
            FaultSpec::cast_byzantine(ValueKind::String, &ByzantineValue::Null, ValueKind::Integer).unwrap(),
            Payload::Null
        );
        assert_eq!(
            FaultSpec::cast_byzantine(ValueKind::String, &text, ValueKind::Integer),
            Err(FaultError::Cast { from: ValueKind::String, expected: ValueKind::Integer })
        );
    }

    #[test]
    fn test_display_labels() {
        let mut metadata = BTreeMap::new();
        metadata.insert("code".to_string(), "UNAVAILABLE".to_string());
        let spec = FaultSpec::Exception { name: "StatusRuntimeException".into(), metadata };
        assert_eq!(spec.to_string(), "exception StatusRuntimeException [code=UNAVAILABLE]");
        let spec = FaultSpec::Transformer { transformer: TransformerKind::StringChars };
        assert_eq!(spec.to_string(), "transformer string_chars");
    }
}
