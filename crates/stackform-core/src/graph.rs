//! Dependency graph over resource instances
//!
//! Nodes are instances, edges point consumer → producer. The graph is the
//! single ordering authority: reference edges and `depends_on` hints arrive
//! here already merged and are indistinguishable.

use crate::address::InstanceAddr;
use crate::error::{ConfigError, Result};
use crate::resolve::ResolvedModel;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Directed acyclic graph of instances, ready for batched traversal
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<InstanceAddr, ()>,
    index: BTreeMap<InstanceAddr, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph from a resolved model. Cycle detection runs before
    /// anything else can use the graph; on cycle the full participating
    /// chain is reported.
    pub fn build(resolved: &ResolvedModel) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();

        for instance in &resolved.instances {
            let idx = graph.add_node(instance.addr.clone());
            index.insert(instance.addr.clone(), idx);
        }
        for (from, to) in &resolved.edges {
            if let (Some(&f), Some(&t)) = (index.get(from), index.get(to)) {
                if graph.find_edge(f, t).is_none() {
                    graph.add_edge(f, t, ());
                }
            }
        }

        let built = Self { graph, index };
        if let Some(chain) = built.find_cycle() {
            return Err(ConfigError::cycle(chain));
        }

        tracing::debug!(
            nodes = built.graph.node_count(),
            edges = built.graph.edge_count(),
            "built dependency graph"
        );
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, addr: &InstanceAddr) -> bool {
        self.index.contains_key(addr)
    }

    /// Direct producers of an instance: everything it references or is
    /// hinted to wait for.
    pub fn dependencies_of(&self, addr: &InstanceAddr) -> Vec<InstanceAddr> {
        let Some(&idx) = self.index.get(addr) else {
            return Vec::new();
        };
        let mut deps: Vec<InstanceAddr> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        deps.sort();
        deps
    }

    /// Transitive consumers of an instance, used to mark dependents blocked
    /// when a producer fails.
    pub fn dependents_of(&self, addr: &InstanceAddr) -> Vec<InstanceAddr> {
        let Some(&start) = self.index.get(addr) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for consumer in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(consumer) {
                    queue.push_back(consumer);
                }
            }
        }
        let mut out: Vec<InstanceAddr> = seen.iter().map(|&n| self.graph[n].clone()).collect();
        out.sort();
        out
    }

    /// Topological batches, producers first. Each batch is a maximal set of
    /// instances whose producers have all been emitted in earlier batches,
    /// so everything within one batch may run concurrently.
    pub fn batches(&self) -> Vec<Vec<InstanceAddr>> {
        let mut emitted = vec![false; self.graph.node_count()];
        let mut remaining: BTreeSet<NodeIndex> = self.graph.node_indices().collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let mut layer: Vec<NodeIndex> = remaining
                .iter()
                .copied()
                .filter(|&n| {
                    self.graph
                        .neighbors_directed(n, Direction::Outgoing)
                        .all(|producer| emitted[producer.index()])
                })
                .collect();
            if layer.is_empty() {
                // Unreachable once build() has rejected cycles.
                break;
            }
            layer.sort_by_key(|&n| self.graph[n].clone());
            for &n in &layer {
                emitted[n.index()] = true;
                remaining.remove(&n);
            }
            batches.push(layer.into_iter().map(|n| self.graph[n].clone()).collect());
        }

        batches
    }

    /// Three-color depth-first search; returns the chain of a back edge if
    /// one exists, with the entry instance repeated at the end.
    fn find_cycle(&self) -> Option<Vec<InstanceAddr>> {
        let mut color = vec![Color::White; self.graph.node_count()];
        let mut stack: Vec<NodeIndex> = Vec::new();

        for node in self.graph.node_indices() {
            if color[node.index()] == Color::White {
                if let Some(chain) = self.dfs(node, &mut color, &mut stack) {
                    return Some(chain);
                }
            }
        }
        None
    }

    fn dfs(
        &self,
        node: NodeIndex,
        color: &mut [Color],
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<InstanceAddr>> {
        color[node.index()] = Color::Gray;
        stack.push(node);

        for succ in self.graph.neighbors_directed(node, Direction::Outgoing) {
            match color[succ.index()] {
                Color::Gray => {
                    let pos = stack.iter().position(|&n| n == succ).unwrap_or(0);
                    let mut chain: Vec<InstanceAddr> =
                        stack[pos..].iter().map(|&n| self.graph[n].clone()).collect();
                    chain.push(self.graph[succ].clone());
                    return Some(chain);
                }
                Color::White => {
                    if let Some(chain) = self.dfs(succ, color, stack) {
                        return Some(chain);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        color[node.index()] = Color::Black;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::resolve_references;
    use crate::resource::{Resource, ResourceModel};
    use crate::value::Value;

    fn topology() -> ResolvedModel {
        let mut model = ResourceModel::new();
        model
            .add(Resource::new("vpc", "main").attr("cidr", "10.0.0.0/16"))
            .unwrap();
        model
            .add(
                Resource::new("subnet", "a").attr("vpc_id", Value::reference("vpc", "main", "id")),
            )
            .unwrap();
        model
            .add(
                Resource::new("subnet", "b").attr("vpc_id", Value::reference("vpc", "main", "id")),
            )
            .unwrap();
        model
            .add(
                Resource::new("cluster", "app")
                    .attr("subnet_a", Value::reference("subnet", "a", "id"))
                    .attr("subnet_b", Value::reference("subnet", "b", "id")),
            )
            .unwrap();
        resolve_references(&model).unwrap()
    }

    #[test]
    fn test_batches_respect_edges_and_cover_all_instances() {
        let resolved = topology();
        let graph = DependencyGraph::build(&resolved).unwrap();
        let batches = graph.batches();

        // Every instance exactly once
        let flat: Vec<String> = batches
            .iter()
            .flatten()
            .map(ToString::to_string)
            .collect();
        assert_eq!(flat.len(), resolved.instances.len());
        let unique: std::collections::BTreeSet<&String> = flat.iter().collect();
        assert_eq!(unique.len(), flat.len());

        // For every edge consumer -> producer, producer batch index is
        // strictly smaller.
        let batch_of = |addr: &InstanceAddr| {
            batches
                .iter()
                .position(|b| b.contains(addr))
                .expect("instance missing from batches")
        };
        for (consumer, producer) in &resolved.edges {
            assert!(batch_of(producer) < batch_of(consumer), "{producer} vs {consumer}");
        }
    }

    #[test]
    fn test_batch_shapes_for_diamond_topology() {
        let graph = DependencyGraph::build(&topology()).unwrap();
        let batches = graph.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 1); // vpc.main
        assert_eq!(batches[1].len(), 2); // both subnets, parallel
        assert_eq!(batches[2].len(), 1); // cluster.app
        assert_eq!(batches[0][0].to_string(), "vpc.main");
    }

    #[test]
    fn test_cycle_reports_true_chain() {
        let mut model = ResourceModel::new();
        model
            .add(Resource::new("a", "x").attr("peer", Value::reference("b", "y", "id")))
            .unwrap();
        model
            .add(Resource::new("b", "y").attr("peer", Value::reference("a", "x", "id")))
            .unwrap();
        let resolved = resolve_references(&model).unwrap();

        let err = DependencyGraph::build(&resolved).unwrap_err();
        let ConfigError::DependencyCycle { chain, path } = err else {
            panic!("expected cycle error");
        };
        // Chain closes on itself and every hop is a real edge.
        assert_eq!(chain.first(), chain.last());
        assert!(chain.len() >= 3);
        for pair in chain.windows(2) {
            assert!(
                resolved.edges.contains(&(pair[0].clone(), pair[1].clone())),
                "{} -> {} is not an edge",
                pair[0],
                pair[1]
            );
        }
        assert!(path.contains(" -> "));
    }

    #[test]
    fn test_dependents_are_transitive() {
        let graph = DependencyGraph::build(&topology()).unwrap();
        let vpc = crate::address::ResourceAddr::new("vpc", "main").instance();
        let dependents = graph.dependents_of(&vpc);
        let names: Vec<String> = dependents.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["cluster.app", "subnet.a", "subnet.b"]);
    }
}
