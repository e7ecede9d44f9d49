//! Vector clock used to order requests causally across nodes.
//!
//! Entries keep insertion order so that the canonical serialization is
//! stable: `{"chris":1}` is both the wire form and the form folded into
//! execution-index ancestry.

use crate::error::ParseError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PartialOrder {
    LessThan,
    GreaterThan,
    Equal,
    Concurrent,
}

/// Map from node identifier to counter. Absent keys read as 0.
#[derive(Debug, Clone, Default)]
pub struct VectorClock {
    entries: Vec<(String, u64)>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps `node` by one and returns the new counter.
    pub fn increment(&mut self, node: &str) -> u64 {
        match self.entries.iter_mut().find(|(k, _)| k == node) {
            Some((_, v)) => {
                *v = v.saturating_add(1);
                *v
            }
            None => {
                self.entries.push((node.to_string(), 1));
                1
            }
        }
    }

    pub fn get(&self, node: &str) -> u64 {
        self.entries
            .iter()
            .find(|(k, _)| k == node)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    /// Sets an explicit counter, keeping the key's original position.
    pub fn set(&mut self, node: &str, value: u64) {
        match self.entries.iter_mut().find(|(k, _)| k == node) {
            Some((_, v)) => *v = value,
            None => self.entries.push((node.to_string(), value)),
        }
    }

    /// True when no node has a positive counter.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, v)| *v == 0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Pointwise max, in place. Keys new to `self` are appended in `other`'s order.
    pub fn merge_into(&mut self, other: &VectorClock) {
        for (node, incoming) in &other.entries {
            match self.entries.iter_mut().find(|(k, _)| k == node) {
                Some((_, local)) => *local = (*local).max(*incoming),
                None => self.entries.push((node.clone(), *incoming)),
            }
        }
    }

    /// Pointwise max over the union of keys.
    pub fn merge(a: &VectorClock, b: &VectorClock) -> VectorClock {
        let mut merged = a.clone();
        merged.merge_into(b);
        merged
    }

    /// Strict causal successor check: `self` dominates `other` everywhere
    /// and exceeds it somewhere. Any non-empty clock descends from the
    /// empty clock; no clock descends from itself.
    pub fn descends(&self, other: &VectorClock) -> bool {
        compare(self, other) == PartialOrder::GreaterThan
    }

    /// Canonical compact JSON, keys in insertion order. Zero entries are
    /// left out, so clocks that compare equal render identically.
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::from("{");
        for (i, (node, value)) in self.positive_entries().enumerate() {
            if i > 0 {
                out.push(',');
            }
            // serde_json string escaping keeps exotic node names round-trippable.
            out.push_str(&serde_json::Value::String(node.clone()).to_string());
            out.push(':');
            out.push_str(&value.to_string());
        }
        out.push('}');
        out
    }

    fn positive_entries(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.entries.iter().filter(|(_, v)| *v > 0).map(|(node, value)| (node, value))
    }

    pub fn parse(text: &str) -> Result<VectorClock, ParseError> {
        let clock: VectorClock = serde_json::from_str(text)?;
        Ok(clock)
    }
}

/// Descends check that tolerates absent clocks. An absent `a` never
/// descends; an absent `b` behaves like the empty clock.
pub fn descends(a: Option<&VectorClock>, b: Option<&VectorClock>) -> bool {
    match (a, b) {
        (None, _) => false,
        (Some(a), None) => !a.is_empty(),
        (Some(a), Some(b)) => a.descends(b),
    }
}

pub fn compare(vc1: &VectorClock, vc2: &VectorClock) -> PartialOrder {
    let mut vc1_le_vc2 = true;
    let mut vc2_le_vc1 = true;

    for node in vc1.nodes().chain(vc2.nodes()) {
        let val1 = vc1.get(node);
        let val2 = vc2.get(node);

        if val1 > val2 { vc1_le_vc2 = false; }
        if val1 < val2 { vc2_le_vc1 = false; }
    }
    if vc1_le_vc2 && vc2_le_vc1 {
        PartialOrder::Equal
    } else if vc1_le_vc2 {
        PartialOrder::LessThan
    } else if vc2_le_vc1 {
        PartialOrder::GreaterThan
    } else {
        PartialOrder::Concurrent
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == PartialOrder::Equal
    }
}

impl Eq for VectorClock {}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl serde::Serialize for VectorClock {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.positive_entries().count()))?;
        for (node, value) in self.positive_entries() {
            map.serialize_entry(node, value)?;
        }
        map.end()
    }
}

impl<'de> serde::Deserialize<'de> for VectorClock {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ClockVisitor;

        impl<'de> Visitor<'de> for ClockVisitor {
            type Value = VectorClock;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping node names to non-negative counters")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<VectorClock, M::Error> {
                let mut clock = VectorClock::new();
                while let Some((node, value)) = access.next_entry::<String, u64>()? {
                    clock.set(&node, value);
                }
                Ok(clock)
            }
        }

        deserializer.deserialize_map(ClockVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(entries: &[(&str, u64)]) -> VectorClock {
        let mut clock = VectorClock::new();
        for (node, value) in entries {
            clock.set(node, *value);
        }
        clock
    }

    #[test]
    fn test_increment_and_serialize() {
        let mut clock = VectorClock::new();
        assert_eq!(clock.increment("chris"), 1);
        assert_eq!(clock.get("chris"), 1);
        assert_eq!(clock.to_canonical_string(), r#"{"chris":1}"#);

        let parsed = VectorClock::parse(&clock.to_canonical_string()).unwrap();
        assert_eq!(parsed.get("chris"), 1);
    }

    #[test]
    fn test_get_absent_is_zero() {
        assert_eq!(VectorClock::new().get("nobody"), 0);
    }

    #[test]
    fn test_canonical_form_keeps_insertion_order() {
        let mut clock = VectorClock::new();
        clock.increment("zeta");
        clock.increment("alpha");
        clock.increment("zeta");
        assert_eq!(clock.to_canonical_string(), r#"{"zeta":2,"alpha":1}"#);
        assert_eq!(serde_json::to_string(&clock).unwrap(), clock.to_canonical_string());
    }

    #[test]
    fn test_merge_into_basic() {
        let mut local = vc(&[("a", 5), ("b", 3)]);
        let incoming = vc(&[("a", 7), ("c", 4)]);
        local.merge_into(&incoming);
        assert_eq!(local.get("a"), 7);
        assert_eq!(local.get("b"), 3);
        assert_eq!(local.get("c"), 4);
        assert_eq!(local.to_canonical_string(), r#"{"a":7,"b":3,"c":4}"#);
    }

    #[test]
    fn test_merge_into_empty_incoming() {
        let mut local = vc(&[("a", 5), ("b", 3)]);
        let original = local.clone();
        local.merge_into(&VectorClock::new());
        assert_eq!(local, original);
    }

    #[test]
    fn test_descends_rules() {
        let empty = VectorClock::new();
        let a = vc(&[("a", 1)]);
        let b = vc(&[("a", 1), ("b", 2)]);

        assert!(a.descends(&empty), "non-empty clock descends from empty");
        assert!(!a.descends(&a), "a clock never descends from itself");
        assert!(!empty.descends(&empty));
        assert!(!empty.descends(&a));
        assert!(b.descends(&a));
        assert!(!a.descends(&b));

        assert!(!descends(None, Some(&a)));
        assert!(!descends(None, None));
        assert!(descends(Some(&a), None));
        assert!(!descends(Some(&empty), None));
    }

    #[test]
    fn test_compare_orders() {
        let vc1 = vc(&[("a", 1), ("b", 1)]);
        let vc2 = vc(&[("a", 1), ("b", 2)]);
        assert_eq!(compare(&vc1, &vc2), PartialOrder::LessThan);
        assert_eq!(compare(&vc2, &vc1), PartialOrder::GreaterThan);
        assert_eq!(compare(&vc1, &vc1.clone()), PartialOrder::Equal);

        let vc3 = vc(&[("a", 2)]);
        assert_eq!(compare(&vc3, &vc2), PartialOrder::Concurrent);
    }

    #[test]
    fn test_zero_entries_compare_equal_to_absent() {
        let explicit_zero = vc(&[("a", 0)]);
        assert_eq!(explicit_zero, VectorClock::new());
        assert!(explicit_zero.is_empty());
        assert_eq!(explicit_zero.to_canonical_string(), "{}");
        assert_eq!(serde_json::to_string(&explicit_zero).unwrap(), "{}");
        assert_eq!(vc(&[("a", 0), ("b", 2)]).to_canonical_string(), r#"{"b":2}"#);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(VectorClock::parse("[1,2]").is_err());
        assert!(VectorClock::parse(r#"{"a":-1}"#).is_err());
        assert!(VectorClock::parse(r#"{"a":"x"}"#).is_err());
    }
}
