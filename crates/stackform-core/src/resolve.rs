//! Reference resolution
//!
//! Scans every instance's attribute tree for reference expressions and turns
//! them into dependency edges, and substitutes references against outputs
//! already known from previous applies.

use crate::address::InstanceAddr;
use crate::error::{ConfigError, Result};
use crate::resource::{ResourceInstance, ResourceModel};
use crate::value::{Attributes, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Outputs recorded per instance, used to substitute references
pub type OutputMap = BTreeMap<InstanceAddr, Attributes>;

/// The model after reference resolution: concrete instances plus the edge
/// set for the dependency graph. Edges point consumer → producer.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub instances: Vec<ResourceInstance>,
    pub edges: Vec<(InstanceAddr, InstanceAddr)>,
}

/// Build the dependency edge set for a model.
///
/// Reference edges and `depends_on` hint edges carry equal weight; a hint
/// duplicating a reference dedupes to a single edge. A reference to an
/// instance that does not exist in the model is fatal.
pub fn resolve_references(model: &ResourceModel) -> Result<ResolvedModel> {
    let instances = model.instances();
    let known: BTreeSet<InstanceAddr> = instances.iter().map(|i| i.addr.clone()).collect();

    let mut edges: BTreeSet<(InstanceAddr, InstanceAddr)> = BTreeSet::new();

    for instance in &instances {
        for (attr_name, value) in &instance.attributes {
            let mut refs = Vec::new();
            value.references(&mut refs);
            for r in refs {
                let target = r.target_instance();
                if !known.contains(&target) {
                    return Err(ConfigError::UnknownReference {
                        from: instance.addr.clone(),
                        attribute: attr_name.clone(),
                        reference: r.to_string(),
                    });
                }
                edges.insert((instance.addr.clone(), target));
            }
        }

        for hint in &instance.depends_on {
            let Some(target) = model.get(hint) else {
                return Err(ConfigError::UnknownDependency {
                    from: instance.addr.resource.clone(),
                    target: hint.clone(),
                });
            };
            // Hint against a counted resource orders after every instance.
            for target_instance in target.instances() {
                edges.insert((instance.addr.clone(), target_instance.addr));
            }
        }
    }

    tracing::debug!(
        instances = instances.len(),
        edges = edges.len(),
        "resolved references"
    );

    Ok(ResolvedModel {
        instances,
        edges: edges.into_iter().collect(),
    })
}

/// Substitute reference expressions against known outputs.
///
/// A reference whose producer has no recorded output becomes `Unknown`, so
/// downstream classification can defer judgement instead of guessing.
pub fn substitute(attrs: &Attributes, outputs: &OutputMap) -> Attributes {
    attrs
        .iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, outputs)))
        .collect()
}

fn substitute_value(value: &Value, outputs: &OutputMap) -> Value {
    match value {
        Value::Ref(r) => outputs
            .get(&r.target_instance())
            .and_then(|attrs| attrs.get(&r.attribute))
            .cloned()
            .unwrap_or(Value::Unknown),
        Value::List(items) => {
            Value::List(items.iter().map(|v| substitute_value(v, outputs)).collect())
        }
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, outputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}
