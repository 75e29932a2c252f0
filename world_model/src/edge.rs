//! Edge vocabulary - typed, directed relations between world nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::node::NodeId;

/// Types of relations between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Spatial / structural containment (area contains location, location
    /// contains npc).
    Contains,
    /// Unlock dependency: the source gates the target.
    Gates,
    /// The source hosts or is occupied by the target.
    Hosts,
    /// Loose social or narrative relation.
    RelatesTo,
    /// Group membership (party, faction).
    Membership,
    /// Travel adjacency between areas or locations.
    Adjacent,
}

impl EdgeType {
    /// All edge types, in a fixed order for deterministic traversal.
    pub const ALL: [EdgeType; 6] = [
        EdgeType::Contains,
        EdgeType::Gates,
        EdgeType::Hosts,
        EdgeType::RelatesTo,
        EdgeType::Membership,
        EdgeType::Adjacent,
    ];
}

/// A typed, directed edge between two node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,

    /// Propagation decay multiplier in (0, 1]; absent means 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,

    /// Free-form authored metadata carried through to callers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EdgeSpec {
    /// Create an edge between two nodes.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, edge_type: EdgeType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            edge_type,
            weight: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the propagation weight.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The weight used by propagation, clamped into (0, 1].
    pub fn decay_weight(&self) -> f32 {
        self.weight.unwrap_or(1.0).clamp(f32::EPSILON, 1.0)
    }

    /// Whether two edges describe the same relation, ignoring weight and
    /// metadata. Used for removal matching.
    pub fn same_relation(&self, other: &EdgeSpec) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.edge_type == other.edge_type
    }
}

impl PartialEq for EdgeSpec {
    fn eq(&self, other: &Self) -> bool {
        self.same_relation(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_weight_defaults_to_one() {
        let edge = EdgeSpec::new("a", "b", EdgeType::Adjacent);
        assert_eq!(edge.decay_weight(), 1.0);
    }

    #[test]
    fn test_decay_weight_clamped() {
        let heavy = EdgeSpec::new("a", "b", EdgeType::Adjacent).with_weight(2.0);
        assert_eq!(heavy.decay_weight(), 1.0);

        let negative = EdgeSpec::new("a", "b", EdgeType::Adjacent).with_weight(-0.5);
        assert!(negative.decay_weight() > 0.0);
    }

    #[test]
    fn test_equality_ignores_weight() {
        let a = EdgeSpec::new("a", "b", EdgeType::Contains).with_weight(0.3);
        let b = EdgeSpec::new("a", "b", EdgeType::Contains);
        let c = EdgeSpec::new("a", "b", EdgeType::Adjacent);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
