//! Typed addresses for resources and their instances

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a declared resource: a `(type, name)` pair, rendered as
/// `type.name` (e.g. `vpc.main`, `subnet.private`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceAddr {
    /// Resource type (e.g. "vpc", "subnet", "cluster")
    pub type_name: String,

    /// Declared name within the type
    pub name: String,
}

impl ResourceAddr {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// Instance address for a single-cardinality resource
    pub fn instance(&self) -> InstanceAddr {
        InstanceAddr {
            resource: self.clone(),
            key: InstanceKey::None,
        }
    }

    /// Instance address for a counted resource
    pub fn index(&self, index: usize) -> InstanceAddr {
        InstanceAddr {
            resource: self.clone(),
            key: InstanceKey::Index(index),
        }
    }

    /// Instance address for a `for_each` resource
    pub fn key(&self, key: impl Into<String>) -> InstanceAddr {
        InstanceAddr {
            resource: self.clone(),
            key: InstanceKey::Key(key.into()),
        }
    }
}

impl fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.name)
    }
}

/// Address suffix distinguishing instances of one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKey {
    /// Single-cardinality resource, no suffix
    None,
    /// `count` expansion
    Index(usize),
    /// `for_each` expansion
    Key(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::None => Ok(()),
            InstanceKey::Index(i) => write!(f, "[{i}]"),
            InstanceKey::Key(k) => write!(f, "[\"{k}\"]"),
        }
    }
}

/// Address of one concrete instance, e.g. `subnet.private[1]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceAddr {
    pub resource: ResourceAddr,
    pub key: InstanceKey,
}

impl fmt::Display for InstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.resource, self.key)
    }
}
