//! Plan computation
//!
//! A plan is an ordered, immutable snapshot combining diff output with
//! dependency-graph batching. It is reviewable before execution and carries
//! the state serial it was computed against so concurrent state movement is
//! caught before anything mutates.

use crate::diff::{destroy_diff, diff_instance, ActionKind, InstanceDiff};
use crate::error::{EngineError, Result};
use crate::provider::ResourceProvider;
use crate::schema::{ReplaceStrategy, SchemaRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackform_core::{
    resolve_references, substitute, Attributes, DependencyGraph, InstanceAddr, ResourceModel,
};
use stackform_state::{StateEntry, StateStore};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One planned action, with everything the executor needs to run it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    pub diff: InstanceDiff,

    /// Replacement sub-order from the type schema
    pub strategy: ReplaceStrategy,

    /// Raw desired attributes (references intact), re-substituted at
    /// execution time once upstream outputs exist. `None` for destroys.
    pub desired: Option<Attributes>,

    /// Instances that must be `Succeeded` before this one may start. For
    /// destroys these are the consumers that have to go first.
    pub deps: Vec<InstanceAddr>,
}

impl PlanAction {
    pub fn addr(&self) -> &InstanceAddr {
        &self.diff.addr
    }

    pub fn kind(&self) -> ActionKind {
        self.diff.kind
    }
}

/// Ordered batches of planned actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub batches: Vec<Vec<PlanAction>>,

    /// State serial the diff was computed against
    pub state_serial: u64,

    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn actions(&self) -> impl Iterator<Item = &PlanAction> {
        self.batches.iter().flatten()
    }

    pub fn get(&self, addr: &InstanceAddr) -> Option<&PlanAction> {
        self.actions().find(|a| a.addr() == addr)
    }

    pub fn has_changes(&self) -> bool {
        self.actions().any(|a| a.kind() != ActionKind::NoOp)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in self.actions() {
            match action.kind() {
                ActionKind::Create => summary.create += 1,
                ActionKind::Update => summary.update += 1,
                ActionKind::Replace => summary.replace += 1,
                ActionKind::Destroy => summary.destroy += 1,
                ActionKind::NoOp => summary.no_change += 1,
            }
        }
        summary
    }

    /// Pretty JSON rendering for external review tooling
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Re-validate against the store's current serial right before
    /// execution; the plan is not re-resolved, only checked for staleness.
    pub fn validate_against(&self, current_serial: u64) -> Result<()> {
        if current_serial != self.state_serial {
            return Err(EngineError::StalePlan {
                planned: self.state_serial,
                current: current_serial,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan: {}", self.summary())?;
        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "batch {}:", i + 1)?;
            for action in batch {
                let marker = match action.kind() {
                    ActionKind::Create => "+",
                    ActionKind::Update => "~",
                    ActionKind::Replace => "±",
                    ActionKind::Destroy => "-",
                    ActionKind::NoOp => " ",
                };
                let provisional = if action.diff.provisional {
                    " (provisional)"
                } else {
                    ""
                };
                writeln!(f, "  {} {}{}", marker, action.addr(), provisional)?;
                if matches!(action.kind(), ActionKind::Update | ActionKind::Replace) {
                    for change in &action.diff.changes {
                        let old = change
                            .old
                            .as_ref()
                            .map_or_else(|| "(none)".to_string(), ToString::to_string);
                        let new = change
                            .new
                            .as_ref()
                            .map_or_else(|| "(none)".to_string(), ToString::to_string);
                        let force = if change.forces_replacement {
                            " (forces replacement)"
                        } else {
                            ""
                        };
                        writeln!(f, "      {}: {} -> {}{}", change.attribute, old, new, force)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Counts of planned actions per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub no_change: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy, {} unchanged",
            self.create, self.update, self.replace, self.destroy, self.no_change
        )
    }
}

/// Compute a plan for the model against the store's current state.
///
/// Entries that left the model come first (consumers destroyed before their
/// producers, using dependencies recorded at apply time), followed by the
/// model's instances in topological batches.
pub async fn build_plan(
    model: &ResourceModel,
    registry: &SchemaRegistry,
    store: &StateStore,
) -> Result<Plan> {
    let resolved = resolve_references(model)?;
    let graph = DependencyGraph::build(&resolved)?;
    let snapshot = store.snapshot().await;
    let outputs = snapshot.outputs();

    let desired: BTreeMap<InstanceAddr, &Attributes> = resolved
        .instances
        .iter()
        .map(|i| (i.addr.clone(), &i.attributes))
        .collect();

    let mut batches: Vec<Vec<PlanAction>> = Vec::new();

    let orphans: Vec<&StateEntry> = snapshot
        .iter()
        .filter(|e| !desired.contains_key(&e.addr))
        .collect();
    batches.extend(destroy_layers(&orphans));

    for layer in graph.batches() {
        let mut batch = Vec::new();
        for addr in layer {
            let Some(attrs) = desired.get(&addr) else {
                continue;
            };
            let schema = registry.get(&addr.resource.type_name)?;
            let substituted = substitute(attrs, &outputs);
            let diff = diff_instance(schema, &addr, &substituted, snapshot.get(&addr));
            batch.push(PlanAction {
                diff,
                strategy: schema.replace_strategy,
                desired: Some((*attrs).clone()),
                deps: graph.dependencies_of(&addr),
            });
        }
        batches.push(batch);
    }

    let plan = Plan {
        batches,
        state_serial: snapshot.serial,
        created_at: Utc::now(),
    };
    tracing::info!(serial = plan.state_serial, "computed plan: {}", plan.summary());
    Ok(plan)
}

/// Plan the teardown of everything currently in state, consumers first
pub async fn build_destroy_plan(store: &StateStore) -> Result<Plan> {
    let snapshot = store.snapshot().await;
    let entries: Vec<&StateEntry> = snapshot.iter().collect();
    let batches = destroy_layers(&entries);

    let plan = Plan {
        batches,
        state_serial: snapshot.serial,
        created_at: Utc::now(),
    };
    tracing::info!(serial = plan.state_serial, "computed destroy plan: {}", plan.summary());
    Ok(plan)
}

/// Layer destroys so every entry is removed only after the entries that
/// recorded it as a dependency are gone.
fn destroy_layers(entries: &[&StateEntry]) -> Vec<Vec<PlanAction>> {
    if entries.is_empty() {
        return Vec::new();
    }

    let addrs: BTreeSet<InstanceAddr> = entries.iter().map(|e| e.addr.clone()).collect();
    let by_addr: BTreeMap<InstanceAddr, &StateEntry> =
        entries.iter().map(|e| (e.addr.clone(), *e)).collect();

    // consumers[p] = entries in this set that must be destroyed before p
    let mut consumers: BTreeMap<InstanceAddr, Vec<InstanceAddr>> =
        addrs.iter().map(|a| (a.clone(), Vec::new())).collect();
    for entry in entries {
        for dep in &entry.dependencies {
            if let Some(list) = consumers.get_mut(dep) {
                list.push(entry.addr.clone());
            }
        }
    }

    let mut emitted: BTreeSet<InstanceAddr> = BTreeSet::new();
    let mut layers = Vec::new();

    while emitted.len() < addrs.len() {
        let mut layer: Vec<InstanceAddr> = addrs
            .iter()
            .filter(|a| !emitted.contains(*a))
            .filter(|a| {
                consumers
                    .get(*a)
                    .is_some_and(|cs| cs.iter().all(|c| emitted.contains(c)))
            })
            .cloned()
            .collect();
        if layer.is_empty() {
            // Recorded dependencies are acyclic by construction; if a hand-
            // edited state file disagrees, fall back to one final batch.
            layer = addrs.iter().filter(|a| !emitted.contains(*a)).cloned().collect();
        }

        let batch = layer
            .iter()
            .filter_map(|a| by_addr.get(a))
            .map(|entry| PlanAction {
                diff: destroy_diff(entry),
                strategy: ReplaceStrategy::DestroyBeforeCreate,
                desired: None,
                deps: consumers.get(&entry.addr).cloned().unwrap_or_default(),
            })
            .collect();
        emitted.extend(layer);
        layers.push(batch);
    }

    layers
}

/// Read every recorded entry back from the provider and verify it still
/// matches the store. Divergence aborts with a re-plan instruction instead
/// of silently reconciling.
pub async fn verify_remote(store: &StateStore, provider: &dyn ResourceProvider) -> Result<()> {
    let snapshot = store.snapshot().await;
    for entry in snapshot.iter() {
        let remote = provider
            .read(&entry.addr, &entry.remote_id)
            .await
            .map_err(|source| EngineError::Remote {
                addr: entry.addr.clone(),
                source,
            })?;

        let Some(remote) = remote else {
            return Err(EngineError::Drift {
                addr: entry.addr.clone(),
                detail: format!("remote object {} no longer exists", entry.remote_id),
            });
        };
        for (name, recorded) in &entry.attributes {
            if remote.attributes.get(name) != Some(recorded) {
                return Err(EngineError::Drift {
                    addr: entry.addr.clone(),
                    detail: format!("attribute '{name}' changed remotely"),
                });
            }
        }
    }
    tracing::debug!(entries = snapshot.len(), "remote state matches the store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackform_core::ResourceAddr;

    fn entry(addr: InstanceAddr, deps: Vec<InstanceAddr>) -> StateEntry {
        StateEntry::new(addr, "r-1", Attributes::new(), "h").with_dependencies(deps)
    }

    #[test]
    fn test_destroy_layers_consumers_first() {
        let vpc = ResourceAddr::new("vpc", "main").instance();
        let subnet = ResourceAddr::new("subnet", "a").instance();
        let cluster = ResourceAddr::new("cluster", "app").instance();

        let e_vpc = entry(vpc.clone(), vec![]);
        let e_subnet = entry(subnet.clone(), vec![vpc.clone()]);
        let e_cluster = entry(cluster.clone(), vec![subnet.clone()]);
        let entries = vec![&e_vpc, &e_subnet, &e_cluster];

        let layers = destroy_layers(&entries);
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0][0].addr(), &cluster);
        assert_eq!(layers[1][0].addr(), &subnet);
        assert_eq!(layers[2][0].addr(), &vpc);
        // The producer waits on its consumer, not the other way around.
        assert_eq!(layers[2][0].deps, vec![subnet.clone()]);
    }

    #[test]
    fn test_plan_serializes_for_review() {
        let vpc = entry(ResourceAddr::new("vpc", "main").instance(), vec![]);
        let plan = Plan {
            batches: destroy_layers(&[&vpc]),
            state_serial: 7,
            created_at: Utc::now(),
        };
        let json = plan.to_json().unwrap();
        assert!(json.contains("\"destroy\""));
        assert!(json.contains("vpc"));
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state_serial, 7);
        assert_eq!(back.summary().destroy, 1);
    }

    #[test]
    fn test_destroy_layers_independent_entries_share_a_batch() {
        let a = entry(ResourceAddr::new("bucket", "a").instance(), vec![]);
        let b = entry(ResourceAddr::new("bucket", "b").instance(), vec![]);
        let layers = destroy_layers(&[&a, &b]);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 2);
    }
}
