//! Per-type behavior policy
//!
//! Each resource type declares which attributes can change in place and
//! which force a replacement, plus the order a replacement runs in. The
//! engine consults this table instead of hard-coding type behavior.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Sub-order of a replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Bring the new resource up before tearing the old one down; for
    /// pool-like resources that tolerate two copies existing briefly.
    CreateBeforeDestroy,
    /// Tear down first; for singleton-named resources that collide on name.
    DestroyBeforeCreate,
}

/// Policy table for one resource type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub type_name: String,
    forces_replacement: BTreeSet<String>,
    pub replace_strategy: ReplaceStrategy,
}

impl ResourceSchema {
    /// New schema with no replacement-forcing attributes and
    /// destroy-before-create replacement.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            forces_replacement: BTreeSet::new(),
            replace_strategy: ReplaceStrategy::DestroyBeforeCreate,
        }
    }

    /// Mark an attribute as forcing replacement when it changes
    pub fn replace_on(mut self, attribute: impl Into<String>) -> Self {
        self.forces_replacement.insert(attribute.into());
        self
    }

    pub fn create_before_destroy(mut self) -> Self {
        self.replace_strategy = ReplaceStrategy::CreateBeforeDestroy;
        self
    }

    pub fn forces_replacement(&self, attribute: &str) -> bool {
        self.forces_replacement.contains(attribute)
    }
}

/// Closed set of known resource type schemas
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.type_name.clone(), schema);
    }

    pub fn with(mut self, schema: ResourceSchema) -> Self {
        self.register(schema);
        self
    }

    /// Look up a type's schema; planning a type with no schema is an error.
    pub fn get(&self, type_name: &str) -> Result<&ResourceSchema> {
        self.schemas
            .get(type_name)
            .ok_or_else(|| EngineError::UnknownSchema(type_name.to_string()))
    }
}
