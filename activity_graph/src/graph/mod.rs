//! The graph container: an arena of typed nodes, adjacency indices, and the
//! append-only change log consumed by snapshots.
//!
//! Nodes and edges never own pointers to each other; every cross-reference is
//! an id looked up through the container, which keeps the cyclic world
//! structure free of ownership cycles.

mod builder;

pub use builder::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use world_model::{EdgeSpec, EdgeType, NodeId, NodeSeed, NodeType, StateValue, WorldNode};

/// Mutation failures raised by the container.
///
/// Everything here is either a construction-time data error (fatal) or an
/// action-level failure the executor records and moves past.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("unknown node `{0}`")]
    UnknownNode(NodeId),

    #[error("node `{0}` already exists")]
    DuplicateNode(NodeId),

    #[error("edge endpoint `{0}` does not exist")]
    DanglingEdge(NodeId),

    #[error("relation already present: {src} -> {target} ({edge_type:?})")]
    DuplicateEdge {
        src: NodeId,
        target: NodeId,
        edge_type: EdgeType,
    },

    #[error("no such edge: {src} -> {target} ({edge_type:?})")]
    UnknownEdge {
        src: NodeId,
        target: NodeId,
        edge_type: EdgeType,
    },

    #[error("graph is sealed; structural changes must go through spawn/retire")]
    Sealed,

    #[error("graph is not sealed; runtime mutation starts after construction")]
    NotSealed,

    #[error("state key `{key}` on `{node}` is not numeric")]
    NonNumericState { node: NodeId, key: String },
}

/// One mutation applied to the graph after sealing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphChange {
    StateSet {
        node: NodeId,
        key: String,
        old: Option<StateValue>,
        new: StateValue,
    },
    NodeSpawned {
        seed: NodeSeed,
        round: u64,
    },
    NodeRemoved {
        node: NodeId,
    },
    EdgeAdded {
        edge: EdgeSpec,
    },
    EdgeRemoved {
        edge: EdgeSpec,
    },
}

/// A change plus its position in the monotone mutation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub seq: u64,
    pub change: GraphChange,
}

/// The in-memory world graph.
///
/// `seal()` freezes the structural shape for the session; from then on only
/// the logged runtime APIs (`set_state`, `adjust_state`, `spawn_node`,
/// `retire_node`, `add_edge`, `remove_edge`) may mutate it, and every such
/// call appends to the change log.
#[derive(Debug, Clone, Default)]
pub struct WorldGraph {
    nodes: HashMap<NodeId, WorldNode>,
    outgoing: HashMap<(NodeId, EdgeType), Vec<EdgeSpec>>,
    incoming: HashMap<(NodeId, EdgeType), Vec<EdgeSpec>>,
    log: Vec<ChangeRecord>,
    next_seq: u64,
    sealed: bool,
}

impl WorldGraph {
    /// Create an empty, unsealed graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, change: GraphChange) {
        if !self.sealed {
            // Construction is not part of the runtime delta.
            return;
        }
        self.next_seq += 1;
        self.log.push(ChangeRecord {
            seq: self.next_seq,
            change,
        });
    }

    /// Freeze the structural shape for the session.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether the shape has been frozen.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    // ---- nodes ----

    /// Add a node during construction. Rejected once sealed.
    pub fn add_node(&mut self, seed: NodeSeed) -> Result<(), GraphError> {
        if self.sealed {
            return Err(GraphError::Sealed);
        }
        if self.nodes.contains_key(&seed.id) {
            return Err(GraphError::DuplicateNode(seed.id));
        }
        let node = WorldNode::from_seed(seed, 0);
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Instantiate a runtime node after sealing. The sole sanctioned way new
    /// nodes enter a live graph; the mutation is logged.
    pub fn spawn_node(&mut self, seed: NodeSeed, round: u64) -> Result<(), GraphError> {
        if !self.sealed {
            return Err(GraphError::NotSealed);
        }
        if self.nodes.contains_key(&seed.id) {
            return Err(GraphError::DuplicateNode(seed.id));
        }
        let node = WorldNode::from_seed(seed.clone(), round);
        self.nodes.insert(node.id.clone(), node);
        self.record(GraphChange::NodeSpawned { seed, round });
        Ok(())
    }

    /// Retire a node and detach its incident edges. Logged.
    pub fn retire_node(&mut self, id: &NodeId) -> Result<WorldNode, GraphError> {
        if !self.sealed {
            return Err(GraphError::NotSealed);
        }
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;

        // Detach every incident edge, logging each removal.
        let mut detached = Vec::new();
        for edge_type in EdgeType::ALL {
            if let Some(edges) = self.outgoing.remove(&(id.clone(), edge_type)) {
                detached.extend(edges);
            }
            if let Some(edges) = self.incoming.remove(&(id.clone(), edge_type)) {
                detached.extend(edges);
            }
        }
        for edge in &detached {
            self.unindex_edge(edge);
            self.record(GraphChange::EdgeRemoved { edge: edge.clone() });
        }

        self.record(GraphChange::NodeRemoved { node: id.clone() });
        Ok(node)
    }

    /// Look up a node by id.
    pub fn get_node(&self, id: &NodeId) -> Option<&WorldNode> {
        self.nodes.get(id)
    }

    /// Whether a node is present.
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &WorldNode> {
        self.nodes.values()
    }

    // ---- edges ----

    fn index_edge(&mut self, edge: EdgeSpec) {
        self.outgoing
            .entry((edge.source.clone(), edge.edge_type))
            .or_default()
            .push(edge.clone());
        self.incoming
            .entry((edge.target.clone(), edge.edge_type))
            .or_default()
            .push(edge);
    }

    fn unindex_edge(&mut self, edge: &EdgeSpec) {
        if let Some(edges) = self.outgoing.get_mut(&(edge.source.clone(), edge.edge_type)) {
            edges.retain(|e| !e.same_relation(edge));
        }
        if let Some(edges) = self.incoming.get_mut(&(edge.target.clone(), edge.edge_type)) {
            edges.retain(|e| !e.same_relation(edge));
        }
    }

    /// Add a typed edge. Endpoints must already exist: a dangling edge is a
    /// hard construction error, not something tolerated at runtime.
    pub fn add_edge(&mut self, edge: EdgeSpec) -> Result<(), GraphError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::DanglingEdge(endpoint.clone()));
            }
        }
        if self.edge_between(&edge.source, &edge.target, edge.edge_type).is_some() {
            return Err(GraphError::DuplicateEdge {
                src: edge.source,
                target: edge.target,
                edge_type: edge.edge_type,
            });
        }
        self.index_edge(edge.clone());
        self.record(GraphChange::EdgeAdded { edge });
        Ok(())
    }

    /// Remove the edge matching the (source, target, type) triple.
    pub fn remove_edge(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        edge_type: EdgeType,
    ) -> Result<EdgeSpec, GraphError> {
        let edge = self
            .edge_between(source, target, edge_type)
            .cloned()
            .ok_or_else(|| GraphError::UnknownEdge {
                src: source.clone(),
                target: target.clone(),
                edge_type,
            })?;
        self.unindex_edge(&edge);
        self.record(GraphChange::EdgeRemoved { edge: edge.clone() });
        Ok(edge)
    }

    /// The edge between two nodes with the given type, if present.
    pub fn edge_between(
        &self,
        source: &NodeId,
        target: &NodeId,
        edge_type: EdgeType,
    ) -> Option<&EdgeSpec> {
        self.outgoing
            .get(&(source.clone(), edge_type))
            .and_then(|edges| edges.iter().find(|e| &e.target == target))
    }

    /// Outgoing edges from a node, optionally restricted to one type.
    pub fn neighbors(&self, id: &NodeId, edge_type: Option<EdgeType>) -> Vec<&EdgeSpec> {
        match edge_type {
            Some(edge_type) => self
                .outgoing
                .get(&(id.clone(), edge_type))
                .map(|edges| edges.iter().collect())
                .unwrap_or_default(),
            None => EdgeType::ALL
                .iter()
                .flat_map(|edge_type| {
                    self.outgoing
                        .get(&(id.clone(), *edge_type))
                        .into_iter()
                        .flatten()
                })
                .collect(),
        }
    }

    /// Incoming edges to a node ("who points at me"), optionally restricted
    /// to one type.
    pub fn incoming_edges(&self, id: &NodeId, edge_type: Option<EdgeType>) -> Vec<&EdgeSpec> {
        match edge_type {
            Some(edge_type) => self
                .incoming
                .get(&(id.clone(), edge_type))
                .map(|edges| edges.iter().collect())
                .unwrap_or_default(),
            None => EdgeType::ALL
                .iter()
                .flat_map(|edge_type| {
                    self.incoming
                        .get(&(id.clone(), *edge_type))
                        .into_iter()
                        .flatten()
                })
                .collect(),
        }
    }

    /// Nodes contained by `id`, optionally filtered by node type.
    pub fn get_children(&self, id: &NodeId, type_filter: Option<NodeType>) -> Vec<&WorldNode> {
        self.neighbors(id, Some(EdgeType::Contains))
            .into_iter()
            .filter_map(|edge| self.nodes.get(&edge.target))
            .filter(|node| type_filter.map_or(true, |t| node.node_type == t))
            .collect()
    }

    /// Entities (npcs, player, items, party) directly inside a scope,
    /// reached through containment or hosting.
    pub fn entities_at(&self, scope: &NodeId) -> Vec<&WorldNode> {
        let mut found = Vec::new();
        for edge_type in [EdgeType::Contains, EdgeType::Hosts] {
            for edge in self.neighbors(scope, Some(edge_type)) {
                if let Some(node) = self.nodes.get(&edge.target) {
                    if node.node_type.is_entity() {
                        found.push(node);
                    }
                }
            }
        }
        found
    }

    /// Walk containment upward to the area a node sits in. An area is its
    /// own containing area.
    pub fn containing_area(&self, id: &NodeId) -> Option<NodeId> {
        let mut current = id.clone();
        // Bounded by node count to survive malformed containment cycles.
        for _ in 0..=self.nodes.len() {
            let node = self.nodes.get(&current)?;
            if node.node_type == NodeType::Area {
                return Some(current);
            }
            let parent = self
                .incoming_edges(&current, Some(EdgeType::Contains))
                .first()
                .map(|edge| edge.source.clone())?;
            current = parent;
        }
        None
    }

    // ---- state ----

    /// Overwrite a state key on a node. Logged with old and new values.
    pub fn set_state(
        &mut self,
        id: &NodeId,
        key: &str,
        value: StateValue,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
        let old = node.state.insert(key.to_string(), value.clone());
        self.record(GraphChange::StateSet {
            node: id.clone(),
            key: key.to_string(),
            old,
            new: value,
        });
        Ok(())
    }

    /// Add a signed delta to a numeric state key.
    ///
    /// Missing keys start from the node's property of the same name, or zero.
    /// The result is clamped: never below zero, never above the node's
    /// configured cap for the key. Returns the value after clamping.
    pub fn adjust_state(&mut self, id: &NodeId, key: &str, delta: i64) -> Result<i64, GraphError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;

        let base = match node.state_value(key) {
            Some(value) => value
                .as_int()
                .ok_or_else(|| GraphError::NonNumericState {
                    node: id.clone(),
                    key: key.to_string(),
                })?,
            None => 0,
        };

        let mut next = base.saturating_add(delta).max(0);
        if let Some(cap) = node.cap_for(key) {
            next = next.min(cap);
        }

        self.set_state(id, key, StateValue::Int(next))?;
        Ok(next)
    }

    // ---- change log ----

    /// Records with `seq` strictly greater than the given sequence number.
    pub fn changes_since(&self, seq: u64) -> &[ChangeRecord] {
        let start = self.log.partition_point(|record| record.seq <= seq);
        &self.log[start..]
    }

    /// The sequence number of the newest record, if any.
    pub fn last_seq(&self) -> Option<u64> {
        self.log.last().map(|record| record.seq)
    }

    /// Drop records up to and including `upto_seq`. Compaction is driven by
    /// the caller after a successful external persist, never automatically.
    pub fn compact_log(&mut self, upto_seq: u64) {
        self.log.retain(|record| record.seq > upto_seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_graph() -> WorldGraph {
        let mut graph = WorldGraph::new();
        graph
            .add_node(NodeSeed::new("area.gate", NodeType::Area, "The Gate"))
            .unwrap();
        graph
            .add_node(NodeSeed::new("loc.wall", NodeType::Location, "Wall Walk"))
            .unwrap();
        graph
            .add_node(
                NodeSeed::new("npc.guard", NodeType::Npc, "Gate Guard")
                    .with_state("hp", 8i64)
                    .with_cap("hp", 10),
            )
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("area.gate", "loc.wall", EdgeType::Contains))
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("loc.wall", "npc.guard", EdgeType::Contains))
            .unwrap();
        graph.seal();
        graph
    }

    #[test]
    fn test_add_and_get_node() {
        let graph = sealed_graph();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(
            graph.get_node(&"npc.guard".into()).unwrap().name,
            "Gate Guard"
        );
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = WorldGraph::new();
        graph
            .add_node(NodeSeed::new("a", NodeType::Area, "A"))
            .unwrap();
        let err = graph
            .add_node(NodeSeed::new("a", NodeType::Area, "A again"))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(_)));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut graph = WorldGraph::new();
        graph
            .add_node(NodeSeed::new("a", NodeType::Area, "A"))
            .unwrap();
        let err = graph
            .add_edge(EdgeSpec::new("a", "ghost", EdgeType::Contains))
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge(id) if id.as_str() == "ghost"));
    }

    #[test]
    fn test_seal_blocks_construction_api() {
        let mut graph = sealed_graph();
        let err = graph
            .add_node(NodeSeed::new("late", NodeType::Npc, "Latecomer"))
            .unwrap_err();
        assert!(matches!(err, GraphError::Sealed));
    }

    #[test]
    fn test_spawn_requires_sealed_graph() {
        let mut graph = WorldGraph::new();
        graph
            .add_node(NodeSeed::new("a", NodeType::Area, "A"))
            .unwrap();
        let err = graph
            .spawn_node(NodeSeed::new("npc.x", NodeType::Npc, "X"), 1)
            .unwrap_err();
        assert!(matches!(err, GraphError::NotSealed));
    }

    #[test]
    fn test_spawn_and_retire_are_logged() {
        let mut graph = sealed_graph();
        graph
            .spawn_node(NodeSeed::new("npc.wisp", NodeType::Npc, "Wisp"), 4)
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("loc.wall", "npc.wisp", EdgeType::Contains))
            .unwrap();
        graph.retire_node(&"npc.wisp".into()).unwrap();

        let kinds: Vec<_> = graph
            .changes_since(0)
            .iter()
            .map(|record| match &record.change {
                GraphChange::NodeSpawned { .. } => "spawn",
                GraphChange::NodeRemoved { .. } => "remove",
                GraphChange::EdgeAdded { .. } => "edge+",
                GraphChange::EdgeRemoved { .. } => "edge-",
                GraphChange::StateSet { .. } => "state",
            })
            .collect();
        assert_eq!(kinds, vec!["spawn", "edge+", "edge-", "remove"]);
    }

    #[test]
    fn test_set_state_logs_old_and_new() {
        let mut graph = sealed_graph();
        graph
            .set_state(&"npc.guard".into(), "mood", "wary".into())
            .unwrap();
        graph
            .set_state(&"npc.guard".into(), "mood", "hostile".into())
            .unwrap();

        let log = graph.changes_since(0);
        assert_eq!(log.len(), 2);
        match &log[1].change {
            GraphChange::StateSet { old, new, .. } => {
                assert_eq!(old, &Some(StateValue::Text("wary".into())));
                assert_eq!(new, &StateValue::Text("hostile".into()));
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[test]
    fn test_adjust_state_clamps() {
        let mut graph = sealed_graph();
        let guard: NodeId = "npc.guard".into();

        // Above the configured cap.
        assert_eq!(graph.adjust_state(&guard, "hp", 100).unwrap(), 10);
        // Never below zero.
        assert_eq!(graph.adjust_state(&guard, "hp", -99).unwrap(), 0);
        // Missing key starts from zero.
        assert_eq!(graph.adjust_state(&guard, "alarm_count", 2).unwrap(), 2);
    }

    #[test]
    fn test_adjust_state_rejects_non_numeric() {
        let mut graph = sealed_graph();
        let guard: NodeId = "npc.guard".into();
        graph.set_state(&guard, "mood", "wary".into()).unwrap();

        let err = graph.adjust_state(&guard, "mood", 1).unwrap_err();
        assert!(matches!(err, GraphError::NonNumericState { .. }));
    }

    #[test]
    fn test_children_and_entities() {
        let graph = sealed_graph();
        let children = graph.get_children(&"area.gate".into(), None);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id.as_str(), "loc.wall");

        // Locations are structure, not entities.
        assert!(graph.entities_at(&"area.gate".into()).is_empty());
        let at_wall = graph.entities_at(&"loc.wall".into());
        assert_eq!(at_wall.len(), 1);
        assert_eq!(at_wall[0].id.as_str(), "npc.guard");
    }

    #[test]
    fn test_containing_area_walks_upward() {
        let graph = sealed_graph();
        assert_eq!(
            graph.containing_area(&"npc.guard".into()),
            Some("area.gate".into())
        );
        assert_eq!(
            graph.containing_area(&"area.gate".into()),
            Some("area.gate".into())
        );
    }

    #[test]
    fn test_incoming_index() {
        let graph = sealed_graph();
        let incoming = graph.incoming_edges(&"npc.guard".into(), Some(EdgeType::Contains));
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source.as_str(), "loc.wall");
    }

    #[test]
    fn test_changes_since_and_compaction() {
        let mut graph = sealed_graph();
        graph
            .set_state(&"npc.guard".into(), "hp", StateValue::Int(5))
            .unwrap();
        graph
            .set_state(&"npc.guard".into(), "hp", StateValue::Int(3))
            .unwrap();

        let all = graph.changes_since(0);
        assert_eq!(all.len(), 2);
        let first_seq = all[0].seq;

        assert_eq!(graph.changes_since(first_seq).len(), 1);

        graph.compact_log(first_seq);
        assert_eq!(graph.changes_since(0).len(), 1);
    }
}
