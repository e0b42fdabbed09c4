//! Declared resources and their expansion into instances

use crate::address::{InstanceAddr, ResourceAddr};
use crate::error::{ConfigError, Result};
use crate::value::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many instances a declared resource expands to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one instance, no address suffix
    Single,
    /// `count = n`: instances suffixed `[0] .. [n-1]`; zero is valid
    Count(usize),
    /// `for_each`: one instance per key, suffixed `["key"]`
    ForEach(Vec<String>),
}

/// A declared resource: address, cardinality, attributes and explicit
/// ordering hints.
///
/// `depends_on` edges have no attribute semantics; they exist for orderings
/// the reference graph cannot express (a cluster must exist before its node
/// group even when the node group holds no direct attribute reference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub addr: ResourceAddr,
    pub cardinality: Cardinality,
    pub attributes: Attributes,
    pub depends_on: Vec<ResourceAddr>,
}

impl Resource {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            addr: ResourceAddr::new(type_name, name),
            cardinality: Cardinality::Single,
            attributes: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.cardinality = Cardinality::Count(count);
        self
    }

    pub fn for_each(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cardinality = Cardinality::ForEach(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn after(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.depends_on.push(ResourceAddr::new(type_name, name));
        self
    }

    /// Expand the declaration into concrete instances
    pub fn instances(&self) -> Vec<ResourceInstance> {
        let addrs: Vec<InstanceAddr> = match &self.cardinality {
            Cardinality::Single => vec![self.addr.instance()],
            Cardinality::Count(n) => (0..*n).map(|i| self.addr.index(i)).collect(),
            Cardinality::ForEach(keys) => keys.iter().map(|k| self.addr.key(k)).collect(),
        };
        addrs
            .into_iter()
            .map(|addr| ResourceInstance {
                addr,
                attributes: self.attributes.clone(),
                depends_on: self.depends_on.clone(),
            })
            .collect()
    }
}

/// One concrete occurrence of a declared resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInstance {
    pub addr: InstanceAddr,
    pub attributes: Attributes,
    pub depends_on: Vec<ResourceAddr>,
}

/// The full desired topology: every declared resource, keyed by address
#[derive(Debug, Clone, Default)]
pub struct ResourceModel {
    resources: BTreeMap<ResourceAddr, Resource>,
}

impl ResourceModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; duplicate addresses are a configuration error.
    pub fn add(&mut self, resource: Resource) -> Result<()> {
        let addr = resource.addr.clone();
        if self.resources.contains_key(&addr) {
            return Err(ConfigError::DuplicateResource(addr));
        }
        self.resources.insert(addr, resource);
        Ok(())
    }

    pub fn remove(&mut self, addr: &ResourceAddr) -> Option<Resource> {
        self.resources.remove(addr)
    }

    pub fn get(&self, addr: &ResourceAddr) -> Option<&Resource> {
        self.resources.get(addr)
    }

    pub fn contains(&self, addr: &ResourceAddr) -> bool {
        self.resources.contains_key(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// All instances across all declared resources
    pub fn instances(&self) -> Vec<ResourceInstance> {
        self.resources.values().flat_map(Resource::instances).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_expansion() {
        let subnet = Resource::new("subnet", "private")
            .count(3)
            .attr("cidr", "10.0.0.0/24");
        let instances = subnet.instances();
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].addr.to_string(), "subnet.private[0]");
        assert_eq!(instances[2].addr.to_string(), "subnet.private[2]");
    }

    #[test]
    fn test_count_zero_expands_to_nothing() {
        let subnet = Resource::new("subnet", "spare").count(0);
        assert!(subnet.instances().is_empty());
    }

    #[test]
    fn test_for_each_expansion() {
        let bucket = Resource::new("bucket", "data").for_each(["logs", "artifacts"]);
        let instances = bucket.instances();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].addr.to_string(), "bucket.data[\"logs\"]");
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut model = ResourceModel::new();
        model.add(Resource::new("vpc", "main")).unwrap();
        let err = model.add(Resource::new("vpc", "main")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateResource(_)));
    }
}
