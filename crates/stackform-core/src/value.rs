//! Attribute values, reference expressions and content hashing

use crate::address::{InstanceAddr, InstanceKey, ResourceAddr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map of a resource or instance
pub type Attributes = BTreeMap<String, Value>;

/// Reference expression: one instance's attribute pointing at another
/// instance's output, e.g. `vpc.main.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefExpr {
    /// Producing resource
    pub target: ResourceAddr,

    /// Which instance of the target (for counted targets)
    pub key: InstanceKey,

    /// Output attribute on the target instance
    pub attribute: String,
}

impl RefExpr {
    pub fn new(
        type_name: impl Into<String>,
        name: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            target: ResourceAddr::new(type_name, name),
            key: InstanceKey::None,
            attribute: attribute.into(),
        }
    }

    pub fn indexed(mut self, index: usize) -> Self {
        self.key = InstanceKey::Index(index);
        self
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = InstanceKey::Key(key.into());
        self
    }

    /// Address of the instance this reference points at
    pub fn target_instance(&self) -> InstanceAddr {
        InstanceAddr {
            resource: self.target.clone(),
            key: self.key.clone(),
        }
    }
}

impl fmt::Display for RefExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", self.target, self.key, self.attribute)
    }
}

/// Attribute value tree
///
/// `Ref` carries an unresolved reference expression; `Unknown` marks a value
/// that only materializes once its producer is applied. Both are gone from
/// any value persisted to state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Ref(RefExpr),
    Unknown,
}

impl Value {
    /// Convenience constructor for a reference expression
    pub fn reference(
        type_name: impl Into<String>,
        name: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Value::Ref(RefExpr::new(type_name, name, attribute))
    }

    /// True if this value or any nested value is `Unknown`
    pub fn contains_unknown(&self) -> bool {
        match self {
            Value::Unknown => true,
            Value::List(items) => items.iter().any(Value::contains_unknown),
            Value::Map(map) => map.values().any(Value::contains_unknown),
            _ => false,
        }
    }

    /// True if the value holds no `Ref` and no `Unknown` anywhere
    pub fn is_resolved(&self) -> bool {
        match self {
            Value::Ref(_) | Value::Unknown => false,
            Value::List(items) => items.iter().all(Value::is_resolved),
            Value::Map(map) => map.values().all(Value::is_resolved),
            _ => true,
        }
    }

    /// Collect every reference expression in the value tree
    pub fn references<'a>(&'a self, out: &mut Vec<&'a RefExpr>) {
        match self {
            Value::Ref(r) => out.push(r),
            Value::List(items) => {
                for item in items {
                    item.references(out);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.references(out);
                }
            }
            _ => {}
        }
    }

    /// Canonical JSON rendering; `None` while the value still holds a
    /// reference or an unknown.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Int(i) => Some(serde_json::Value::from(*i)),
            Value::String(s) => Some(serde_json::Value::String(s.clone())),
            Value::List(items) => items
                .iter()
                .map(Value::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json()?);
                }
                Some(serde_json::Value::Object(obj))
            }
            Value::Ref(_) | Value::Unknown => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unknown => write!(f, "(known after apply)"),
            Value::Ref(r) => write!(f, "{r}"),
            other => match other.to_json() {
                Some(json) => write!(f, "{json}"),
                None => write!(f, "(unresolved)"),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// blake3 hash of an attribute map in canonical JSON form
///
/// Returns `None` while any attribute is unresolved; a hash is only
/// meaningful over concrete values.
pub fn content_hash(attrs: &Attributes) -> Option<String> {
    let mut obj = serde_json::Map::new();
    for (k, v) in attrs {
        obj.insert(k.clone(), v.to_json()?);
    }
    let bytes = serde_json::to_vec(&serde_json::Value::Object(obj)).ok()?;
    Some(blake3::hash(&bytes).to_hex().to_string())
}
