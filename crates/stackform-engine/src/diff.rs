//! Diff engine: classify each instance by comparing desired attributes
//! against its recorded state entry

use crate::schema::ResourceSchema;
use serde::{Deserialize, Serialize};
use stackform_core::{content_hash, Attributes, InstanceAddr, Value};
use stackform_state::StateEntry;
use std::fmt;

/// What the executor will do for one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Replace,
    Destroy,
    NoOp,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Replace => write!(f, "replace"),
            ActionKind::Destroy => write!(f, "destroy"),
            ActionKind::NoOp => write!(f, "no-op"),
        }
    }
}

/// One attribute's change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrDiff {
    pub attribute: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub forces_replacement: bool,
}

/// Classification result for one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDiff {
    pub addr: InstanceAddr,
    pub kind: ActionKind,
    pub changes: Vec<AttrDiff>,

    /// True while some desired attribute is still unknown; the
    /// classification is a best guess finalized during execution, once
    /// upstream outputs exist.
    pub provisional: bool,
}

/// Classify one instance present in the model.
///
/// `desired` must already have references substituted; attributes whose
/// producers have not applied yet arrive as [`Value::Unknown`] and make the
/// result provisional instead of being guessed at.
pub fn diff_instance(
    schema: &ResourceSchema,
    addr: &InstanceAddr,
    desired: &Attributes,
    prior: Option<&StateEntry>,
) -> InstanceDiff {
    let Some(prior) = prior else {
        let provisional = desired.values().any(Value::contains_unknown);
        let changes = desired
            .iter()
            .map(|(k, v)| AttrDiff {
                attribute: k.clone(),
                old: None,
                new: Some(v.clone()),
                forces_replacement: false,
            })
            .collect();
        return InstanceDiff {
            addr: addr.clone(),
            kind: ActionKind::Create,
            changes,
            provisional,
        };
    };

    // Identical configuration short-circuits on the recorded content hash.
    if content_hash(desired).as_deref() == Some(prior.config_hash.as_str()) {
        return InstanceDiff {
            addr: addr.clone(),
            kind: ActionKind::NoOp,
            changes: Vec::new(),
            provisional: false,
        };
    }

    let mut changes = Vec::new();
    let mut provisional = false;

    // Compare over desired keys only; computed attributes the provider
    // reported but the model never set are not changes.
    for (name, new) in desired {
        let old = prior.attributes.get(name);
        if new.contains_unknown() {
            provisional = true;
        } else if old == Some(new) {
            continue;
        }
        changes.push(AttrDiff {
            attribute: name.clone(),
            old: old.cloned(),
            new: Some(new.clone()),
            forces_replacement: schema.forces_replacement(name),
        });
    }

    // An attribute that left the configuration since last apply still has
    // to be unset remotely.
    for (name, applied) in &prior.configuration {
        if desired.contains_key(name) {
            continue;
        }
        changes.push(AttrDiff {
            attribute: name.clone(),
            old: prior.attributes.get(name).or(Some(applied)).cloned(),
            new: None,
            forces_replacement: schema.forces_replacement(name),
        });
    }

    let kind = if changes.is_empty() {
        ActionKind::NoOp
    } else if changes.iter().any(|c| c.forces_replacement) {
        ActionKind::Replace
    } else {
        ActionKind::Update
    };

    InstanceDiff {
        addr: addr.clone(),
        kind,
        changes,
        provisional,
    }
}

/// Diff for an entry that left the model: destroy, listing what goes away
pub fn destroy_diff(entry: &StateEntry) -> InstanceDiff {
    let changes = entry
        .attributes
        .iter()
        .map(|(k, v)| AttrDiff {
            attribute: k.clone(),
            old: Some(v.clone()),
            new: None,
            forces_replacement: false,
        })
        .collect();
    InstanceDiff {
        addr: entry.addr.clone(),
        kind: ActionKind::Destroy,
        changes,
        provisional: false,
    }
}
