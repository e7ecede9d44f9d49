use crate::error::FaultError;
use crate::types::ValueKind;

// --- Call sites ---------------------------------------------------------------

/// Static identity of one outgoing call as seen by the instrumentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CallSite {
    /// Stable call-site signature (e.g. `"ProfileClient::get_user@profile.rs:42"`).
    pub signature: String,
    /// Fully-qualified remote method name, matched against catalog patterns.
    pub method: String,
    /// Request arguments, used to detect repeated identical calls.
    pub arguments: Payload,
}

impl CallSite {
    pub fn new(signature: impl Into<String>, method: impl Into<String>) -> Self {
        CallSite {
            signature: signature.into(),
            method: method.into(),
            arguments: Payload::Null,
        }
    }

    pub fn with_arguments(mut self, arguments: Payload) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn service(&self) -> &str {
        service_name(&self.method)
    }
}

/// Service part of a fully-qualified method name: everything before the
/// last `/` (`"pkg.Users/Get"` -> `"pkg.Users"`), or before the last `.`
/// when there is no `/` (`"redis.Commands.get"` -> `"redis.Commands"`).
pub fn service_name(method: &str) -> &str {
    method
        .rfind('/')
        .or_else(|| method.rfind('.'))
        .map(|pos| &method[..pos])
        .unwrap_or(method)
}

// --- Payloads -----------------------------------------------------------------

/// A request or response value, reduced to the shapes the engine can reason about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Null,
    Text(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Integer(i64),
    Boolean(bool),
}

impl Payload {
    /// Kind of a non-null payload.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Payload::Null => None,
            Payload::Text(_) => Some(ValueKind::String),
            Payload::Bytes(_) => Some(ValueKind::Bytes),
            Payload::Integer(_) => Some(ValueKind::Integer),
            Payload::Boolean(_) => Some(ValueKind::Boolean),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compact JSON used when payloads take part in equality keys.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<i64> for Payload {
    fn from(i: i64) -> Self {
        Payload::Integer(i)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Boolean(b)
    }
}

// --- Outcomes -----------------------------------------------------------------

/// What happened to a call, as reported back through `after_call`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call returned a value (real, substituted, or transformed).
    Success { response: Payload },
    /// The call raised an error, real or injected.
    Failed { error: String },
    /// The chosen fault could not be applied at this call.
    InjectionFailed { error: FaultError },
}

impl CallOutcome {
    pub fn success(response: impl Into<Payload>) -> Self {
        CallOutcome::Success { response: response.into() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        CallOutcome::Failed { error: error.into() }
    }

    pub fn response(&self) -> Option<&Payload> {
        match self {
            CallOutcome::Success { response } => Some(response),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }
}

/// One step of a transformer: the mutated payload and whether another step exists.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Mutation {
    pub value: Payload,
    pub has_next: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("app.UserService/GetUser"), "app.UserService");
        assert_eq!(service_name("io.lettuce.RedisStringCommands.get"), "io.lettuce.RedisStringCommands");
        assert_eq!(service_name("ping"), "ping");
        assert_eq!(CallSite::new("a.rs:1", "shop.Cart/Add").service(), "shop.Cart");
    }

    #[test]
    fn test_payload_kinds() {
        assert_eq!(Payload::from("hi").kind(), Some(ValueKind::String));
        assert_eq!(Payload::from(vec![1u8]).kind(), Some(ValueKind::Bytes));
        assert_eq!(Payload::from(3i64).kind(), Some(ValueKind::Integer));
        assert_eq!(Payload::from(true).kind(), Some(ValueKind::Boolean));
        assert_eq!(Payload::Null.kind(), None);
    }

    #[test]
    fn test_canonical_distinguishes_shapes() {
        assert_ne!(Payload::from("1").canonical(), Payload::from(1i64).canonical());
        assert_eq!(Payload::from("a").canonical(), Payload::from("a".to_string()).canonical());
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = CallOutcome::success("body");
        assert!(ok.is_success());
        assert_eq!(ok.response(), Some(&Payload::from("body")));
        assert_eq!(CallOutcome::failed("boom").response(), None);
    }
}
