//! Fault catalog: ordered method-pattern rules and the faults each allows.
//!
//! Rules are evaluated in order and the first whose pattern matches the
//! fully-qualified method name governs the call site. Patterns are
//! case-insensitive and unanchored. Within the governing entry every listed
//! fault is explorable on its own, in the order exceptions, byzantine
//! values, transformers.
//!
//! Catalogs load from the JSON analysis-file format:
//!
//! ```json
//! {
//!   "grpc.exceptions": {
//!     "pattern": "(.*Service/.*)",
//!     "exceptions": [{ "name": "StatusRuntimeException", "metadata": { "code": "UNAVAILABLE" } }]
//!   },
//!   "redis.byzantine": {
//!     "pattern": "RedisStringCommands.get",
//!     "byzantines": [{ "type": "string", "value": null }],
//!     "transformers": [{ "transformer": "string_chars" }]
//!   }
//! }
//! ```
//!
//! Every structural problem is a [`ConfigError`] at load time.

pub mod faults;
pub mod transformers;

pub use faults::{ByzantineValue, FaultSpec};
pub use transformers::TransformerKind;

use crate::error::ConfigError;
use crate::types::ValueKind;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// One named rule.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    name: String,
    pattern: Regex,
    exceptions: Vec<FaultSpec>,
    byzantines: Vec<FaultSpec>,
    transformers: Vec<FaultSpec>,
}

impl CatalogEntry {
    pub fn builder(name: impl Into<String>) -> CatalogEntryBuilder {
        CatalogEntryBuilder {
            name: name.into(),
            pattern: None,
            faults: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, method: &str) -> bool {
        self.pattern.is_match(method)
    }

    /// Every fault this entry allows, in exploration order.
    pub fn explorable_faults(&self) -> impl Iterator<Item = &FaultSpec> {
        self.exceptions.iter().chain(&self.byzantines).chain(&self.transformers)
    }

    /// Faults that can be chosen before the call's response is known.
    pub fn immediate_faults(&self) -> impl Iterator<Item = &FaultSpec> {
        self.exceptions.iter().chain(&self.byzantines)
    }

    /// Transformer faults; these need a reference payload first.
    pub fn transformer_faults(&self) -> impl Iterator<Item = &FaultSpec> {
        self.transformers.iter()
    }

    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("pattern".into(), Value::String(self.pattern().to_string()));
        for (key, list) in [
            ("exceptions", &self.exceptions),
            ("byzantines", &self.byzantines),
            ("transformers", &self.transformers),
        ] {
            if !list.is_empty() {
                obj.insert(key.into(), Value::Array(list.iter().map(FaultSpec::to_json).collect()));
            }
        }
        Value::Object(obj)
    }
}

/// Programmatic mirror of the analysis-file format.
#[derive(Debug, Clone)]
pub struct CatalogEntryBuilder {
    name: String,
    pattern: Option<String>,
    faults: Vec<FaultSpec>,
}

impl CatalogEntryBuilder {
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn exception(mut self, name: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        self.faults.push(FaultSpec::Exception { name: name.into(), metadata });
        self
    }

    pub fn byzantine(mut self, kind: ValueKind, value: ByzantineValue) -> Self {
        self.faults.push(FaultSpec::Byzantine { kind, value });
        self
    }

    pub fn transformer(mut self, transformer: TransformerKind) -> Self {
        self.faults.push(FaultSpec::Transformer { transformer });
        self
    }

    pub fn build(self) -> Result<CatalogEntry, ConfigError> {
        let pattern_text = self.pattern.ok_or_else(|| ConfigError::MissingPattern(self.name.clone()))?;
        let pattern = compile_pattern(&self.name, &pattern_text)?;
        let mut entry = CatalogEntry {
            name: self.name,
            pattern,
            exceptions: Vec::new(),
            byzantines: Vec::new(),
            transformers: Vec::new(),
        };
        for fault in self.faults {
            match &fault {
                FaultSpec::Exception { .. } => entry.exceptions.push(fault),
                FaultSpec::Byzantine { kind, value } => {
                    check_byzantine(&entry.name, *kind, value)?;
                    entry.byzantines.push(fault);
                }
                FaultSpec::Transformer { .. } => entry.transformers.push(fault),
            }
        }
        Ok(entry)
    }
}

fn compile_pattern(rule: &str, pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::InvalidPattern { rule: rule.to_string(), source })
}

// A typed value must agree with its declared kind; strings may stand in for bytes.
fn check_byzantine(rule: &str, kind: ValueKind, value: &ByzantineValue) -> Result<(), ConfigError> {
    let ok = matches!(
        (kind, value),
        (_, ByzantineValue::Null)
            | (ValueKind::String, ByzantineValue::Text(_))
            | (ValueKind::Bytes, ByzantineValue::Bytes(_))
            | (ValueKind::Bytes, ByzantineValue::Text(_))
            | (ValueKind::Integer, ByzantineValue::Integer(_))
            | (ValueKind::Boolean, ByzantineValue::Boolean(_))
    );
    if ok {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedByzantineValue {
            rule: rule.to_string(),
            kind,
            value: format!("{value:?}"),
        })
    }
}

/// Ordered rule set.
#[derive(Debug, Clone, Default)]
pub struct FaultCatalog {
    entries: Vec<CatalogEntry>,
}

impl FaultCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        FaultCatalog { entries }
    }

    pub fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry whose pattern matches `method`.
    pub fn match_method(&self, method: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.matches(method))
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json_value(&value)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_value(value: &Value) -> Result<Self, ConfigError> {
        let rules = value
            .as_object()
            .ok_or_else(|| ConfigError::Malformed("analysis file must be an object of named rules".into()))?;
        let mut entries = Vec::with_capacity(rules.len());
        for (name, rule) in rules {
            entries.push(parse_rule(name, rule)?);
        }
        tracing::debug!(rules = entries.len(), "fault catalog loaded");
        Ok(FaultCatalog { entries })
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for entry in &self.entries {
            obj.insert(entry.name.clone(), entry.to_json());
        }
        Value::Object(obj)
    }
}

fn parse_rule(name: &str, rule: &Value) -> Result<CatalogEntry, ConfigError> {
    let malformed = |what: &str| ConfigError::Malformed(format!("rule `{name}`: {what}"));
    let rule = rule.as_object().ok_or_else(|| malformed("expected an object"))?;

    let mut builder = CatalogEntry::builder(name);
    match rule.get("pattern") {
        Some(Value::String(p)) => builder = builder.pattern(p.clone()),
        Some(_) => return Err(malformed("`pattern` must be a string")),
        None => return Err(ConfigError::MissingPattern(name.to_string())),
    }

    for item in list(rule, "exceptions").map_err(|e| malformed(&e))? {
        let exc_name = item
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("exception without a `name`"))?;
        let mut metadata = BTreeMap::new();
        if let Some(meta) = item.get("metadata") {
            let meta = meta.as_object().ok_or_else(|| malformed("exception `metadata` must be an object"))?;
            for (k, v) in meta {
                let text = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                metadata.insert(k.clone(), text);
            }
        }
        builder = builder.exception(exc_name, metadata);
    }

    for item in list(rule, "byzantines").map_err(|e| malformed(&e))? {
        let token = item
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("byzantine fault without a `type`"))?;
        let kind = ValueKind::from_token(token).ok_or_else(|| ConfigError::UnknownFaultType {
            rule: name.to_string(),
            token: token.to_string(),
        })?;
        let value = ByzantineValue::from_json(name, kind, item.get("value").unwrap_or(&Value::Null))?;
        builder = builder.byzantine(kind, value);
    }

    for item in list(rule, "transformers").map_err(|e| malformed(&e))? {
        let token = item
            .get("transformer")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("transformer fault without a `transformer`"))?;
        let kind = TransformerKind::from_token(token).ok_or_else(|| ConfigError::UnknownTransformer {
            rule: name.to_string(),
            token: token.to_string(),
        })?;
        builder = builder.transformer(kind);
    }

    builder.build()
}

fn list<'a>(rule: &'a Map<String, Value>, key: &str) -> Result<Vec<&'a Map<String, Value>>, String> {
    match rule.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| i.as_object().ok_or_else(|| format!("`{key}` entries must be objects")))
            .collect(),
        Some(_) => Err(format!("`{key}` must be an array")),
    }
}
