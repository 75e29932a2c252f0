//! Node vocabulary - the typed entities of the world activity graph.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable identifier for a world node.
///
/// Ids are author-authored strings (e.g. `"area.blackfen"`, `"npc.elder_rowan"`)
/// rather than random uuids: a snapshot written by one process must map onto
/// the freshly rebuilt graph of the next session, which requires ids that are
/// identical across rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a node id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// View the id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Types of nodes in the world graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// The single root of the world tree.
    WorldRoot,
    /// A narrative chapter grouping regions and events.
    Chapter,
    /// A geographic region grouping areas.
    Region,
    /// A playable area; the evaluation scope for most events.
    Area,
    /// A concrete location inside an area.
    Location,
    Npc,
    Player,
    Item,
    /// The node backing an authored event definition.
    EventDefinition,
    /// The traveling party / camp.
    Party,
}

impl NodeType {
    /// Whether nodes of this type count as inhabitants of a scope
    /// (as opposed to structure such as areas and locations).
    pub fn is_entity(self) -> bool {
        matches!(
            self,
            NodeType::Npc | NodeType::Player | NodeType::Item | NodeType::Party
        )
    }
}

/// A runtime-mutable state value.
///
/// The untagged representation keeps authored content natural:
/// `hp = 10`, `alive = true`, `mood = "wary"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StateValue {
    /// Interpret the value as an integer, if it is numeric.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(v) => Some(*v),
            StateValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Interpret the value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Int(v) => Some(*v as f64),
            StateValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Truthiness used by flag conditions: `true`, any non-zero number,
    /// or a non-empty string.
    pub fn truthy(&self) -> bool {
        match self {
            StateValue::Bool(v) => *v,
            StateValue::Int(v) => *v != 0,
            StateValue::Float(v) => *v != 0.0,
            StateValue::Text(v) => !v.is_empty(),
        }
    }

    /// Ordered comparison across the numeric variants.
    ///
    /// Returns `None` when either side is non-numeric; comparing text to
    /// numbers is a content bug, not an ordering.
    pub fn compare(&self, other: &StateValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (StateValue::Text(a), StateValue::Text(b)) => Some(a.cmp(b)),
            (StateValue::Bool(_), _) | (_, StateValue::Bool(_)) => None,
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Loose equality: `Int(3)` equals `Float(3.0)`.
    pub fn loosely_equals(&self, other: &StateValue) -> bool {
        match (self, other) {
            (StateValue::Bool(a), StateValue::Bool(b)) => a == b,
            (StateValue::Text(a), StateValue::Text(b)) => a == b,
            _ => matches!(self.compare(other), Some(std::cmp::Ordering::Equal)),
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

/// An author-authored node definition consumed at graph construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSeed {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: String,

    /// Static attributes, immutable after construction.
    #[serde(default)]
    pub properties: HashMap<String, StateValue>,

    /// Initial runtime state.
    #[serde(default)]
    pub state: HashMap<String, StateValue>,

    /// Per-key ceilings for clamped numeric state (e.g. `hp -> max_hp`).
    #[serde(default)]
    pub state_caps: HashMap<String, i64>,
}

impl NodeSeed {
    /// Create a new seed with the given id, type, and display name.
    pub fn new(id: impl Into<NodeId>, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            name: name.into(),
            properties: HashMap::new(),
            state: HashMap::new(),
            state_caps: HashMap::new(),
        }
    }

    /// Attach a static property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Attach an initial state entry.
    pub fn with_state(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.state.insert(key.into(), value.into());
        self
    }

    /// Attach a clamping ceiling for a numeric state key.
    pub fn with_cap(mut self, key: impl Into<String>, max: i64) -> Self {
        self.state_caps.insert(key.into(), max);
        self
    }
}

/// A node at runtime: seed data plus mutable state.
///
/// Nodes never hold references to other nodes; all relations go through the
/// graph container by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: String,
    pub properties: HashMap<String, StateValue>,
    pub state: HashMap<String, StateValue>,
    pub state_caps: HashMap<String, i64>,

    /// The game round the node entered the graph (0 for built nodes).
    pub created_at: u64,
}

impl WorldNode {
    /// Instantiate a runtime node from its seed.
    pub fn from_seed(seed: NodeSeed, created_at: u64) -> Self {
        Self {
            id: seed.id,
            node_type: seed.node_type,
            name: seed.name,
            properties: seed.properties,
            state: seed.state,
            state_caps: seed.state_caps,
            created_at,
        }
    }

    /// Look up a state key, falling back to static properties.
    ///
    /// Runtime state shadows authored properties of the same name.
    pub fn state_value(&self, key: &str) -> Option<&StateValue> {
        self.state.get(key).or_else(|| self.properties.get(key))
    }

    /// The configured ceiling for a state key, if any.
    pub fn cap_for(&self, key: &str) -> Option<i64> {
        self.state_caps.get(key).copied()
    }
}
