//! Stackform resource model
//!
//! This crate holds the declarative side of stackform: typed resource
//! addresses, attribute values (including reference expressions and the
//! unknown-until-apply marker), resource definitions with `count`/`for_each`
//! cardinality, reference resolution, and the dependency graph that orders
//! execution.
//!
//! ```text
//! ResourceModel ──resolve──▶ ResolvedModel ──build──▶ DependencyGraph
//!      │                          │                        │
//!      │ declared resources       │ instances + edges      │ ordered batches
//! ```
//!
//! Everything here is pure data and graph work; talking to a provider and
//! persisting state live in the `stackform-engine` and `stackform-state`
//! crates.

pub mod address;
pub mod error;
pub mod graph;
pub mod resolve;
pub mod resource;
pub mod value;

// Re-exports
pub use address::{InstanceAddr, InstanceKey, ResourceAddr};
pub use error::{ConfigError, Result};
pub use graph::DependencyGraph;
pub use resolve::{resolve_references, substitute, OutputMap, ResolvedModel};
pub use resource::{Cardinality, Resource, ResourceInstance, ResourceModel};
pub use value::{content_hash, Attributes, RefExpr, Value};
