//! Declarative rules: triggers, condition trees, and actions.
//!
//! Everything in this module is plain serializable data so content can be
//! authored in TOML and validated offline before a session loads it. Rules
//! are never code.

use serde::{Deserialize, Serialize};

use crate::event::{EventId, EventStatus, PropagationScope};
use crate::node::{NodeId, NodeSeed, StateValue};

/// Stable identifier for an authored behavior.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorId(pub String);

impl BehaviorId {
    /// Create a behavior id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// View the id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BehaviorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What wakes a behavior up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    OnTick,
    OnEnter,
    OnExit,
    OnEventReceived,
}

/// A leaf condition over current graph state.
///
/// The set is closed; the evaluator matches it exhaustively so a new kind is
/// a compile error everywhere it matters, never a silent no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// A node's state (or property) equals a value.
    StateEquals {
        node: NodeId,
        key: String,
        value: StateValue,
    },
    /// A node's numeric state is strictly above a threshold.
    StateAbove {
        node: NodeId,
        key: String,
        threshold: StateValue,
    },
    /// A node's numeric state is strictly below a threshold.
    StateBelow {
        node: NodeId,
        key: String,
        threshold: StateValue,
    },
    /// The node is present in the graph.
    NodeExists { node: NodeId },
    /// A typed edge exists between two nodes.
    RelationExists {
        source: NodeId,
        target: NodeId,
        edge_type: crate::edge::EdgeType,
    },
    /// An event instance currently has the given status.
    EventStatusIs { event: EventId, status: EventStatus },
    /// At least `rounds` game rounds elapsed since the event's last status
    /// change.
    TimeElapsedSince { event: EventId, rounds: u64 },
    /// A boolean-ish state key on a node is truthy.
    FlagSet { node: NodeId, flag: String },
    /// A numeric counter on a node reached a threshold.
    CounterAtLeast {
        node: NodeId,
        counter: String,
        threshold: i64,
    },
    /// Composite reference: another event has completed at least once.
    EventCompleted { event: EventId },
}

impl Condition {
    /// Whether this leaf reads the given event's instance state.
    pub fn references_event(&self, event: &EventId) -> bool {
        match self {
            Condition::EventStatusIs { event: e, .. }
            | Condition::TimeElapsedSince { event: e, .. }
            | Condition::EventCompleted { event: e } => e == event,
            _ => false,
        }
    }
}

/// A boolean tree of leaf conditions.
///
/// Groups evaluate left to right with short-circuiting; an empty `All` is
/// vacuously true and an empty `Any` is vacuously false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionGroup {
    Leaf(Condition),
    All(Vec<ConditionGroup>),
    Any(Vec<ConditionGroup>),
    Not(Box<ConditionGroup>),
}

impl ConditionGroup {
    /// A group that always evaluates true.
    pub fn always() -> Self {
        ConditionGroup::All(Vec::new())
    }

    /// Wrap a single leaf condition.
    pub fn leaf(condition: Condition) -> Self {
        ConditionGroup::Leaf(condition)
    }

    /// Conjunction of groups.
    pub fn all(groups: impl IntoIterator<Item = ConditionGroup>) -> Self {
        ConditionGroup::All(groups.into_iter().collect())
    }

    /// Disjunction of groups.
    pub fn any(groups: impl IntoIterator<Item = ConditionGroup>) -> Self {
        ConditionGroup::Any(groups.into_iter().collect())
    }

    /// Negation of a group.
    pub fn negate(group: ConditionGroup) -> Self {
        ConditionGroup::Not(Box::new(group))
    }

    /// Whether any leaf in the tree reads the given event.
    pub fn references_event(&self, event: &EventId) -> bool {
        match self {
            ConditionGroup::Leaf(condition) => condition.references_event(event),
            ConditionGroup::All(groups) | ConditionGroup::Any(groups) => {
                groups.iter().any(|g| g.references_event(event))
            }
            ConditionGroup::Not(group) => group.references_event(event),
        }
    }
}

/// A single reward line: an item and how many of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemGrant {
    pub item: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// What a `GrantReward` action hands to the inventory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RewardSpec {
    #[serde(default)]
    pub items: Vec<ItemGrant>,
    #[serde(default)]
    pub xp: u64,
    #[serde(default)]
    pub gold: u64,
    /// Authored prose surfaced alongside the grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative_hint: Option<String>,
}

impl RewardSpec {
    /// A reward of only experience points.
    pub fn xp(amount: u64) -> Self {
        Self {
            xp: amount,
            ..Self::default()
        }
    }

    /// Append an item line.
    pub fn with_item(mut self, item: impl Into<String>, quantity: u32) -> Self {
        self.items.push(ItemGrant {
            item: item.into(),
            quantity,
        });
        self
    }

    /// Set the gold amount.
    pub fn with_gold(mut self, gold: u64) -> Self {
        self.gold = gold;
        self
    }

    /// Whether there is nothing to hand over.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.xp == 0 && self.gold == 0
    }
}

fn default_strength() -> f32 {
    1.0
}

/// A declarative operation against the graph.
///
/// Actions are data, not code; the executor matches the set exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Overwrite a state key on a node.
    SetState {
        node: NodeId,
        key: String,
        value: StateValue,
    },
    /// Add a signed delta to a numeric state key, clamped to `[0, cap]`.
    AdjustState {
        node: NodeId,
        key: String,
        delta: i64,
    },
    /// Emit an event occurrence for propagation.
    EmitEvent {
        event: EventId,
        origin: NodeId,
        #[serde(default)]
        scope: PropagationScope,
        #[serde(default = "default_strength")]
        strength: f32,
    },
    /// Instantiate a new runtime node under a parent scope.
    SpawnNode { seed: NodeSeed, at: NodeId },
    /// Retire a node and its incident edges.
    RemoveNode { node: NodeId },
    /// Flip a dependent event from locked to available.
    UnlockBehavior { event: EventId },
    /// Hand items/xp/gold to the external inventory collaborator.
    GrantReward { recipient: NodeId, reward: RewardSpec },
}

impl Action {
    /// Whether this action targets the given event's instance state.
    pub fn references_event(&self, event: &EventId) -> bool {
        match self {
            Action::EmitEvent { event: e, .. } | Action::UnlockBehavior { event: e } => e == event,
            _ => false,
        }
    }
}

/// A declarative rule bound to a node: trigger + conditions + actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub id: BehaviorId,

    /// The node the rule is bound to.
    pub owner: NodeId,

    pub trigger: TriggerKind,

    #[serde(default = "ConditionGroup::always")]
    pub conditions: ConditionGroup,

    /// Executed in strict list order when the conditions hold.
    pub actions: Vec<Action>,
}

impl Behavior {
    /// Create a rule bound to a node.
    pub fn new(id: impl Into<BehaviorId>, owner: impl Into<NodeId>, trigger: TriggerKind) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            trigger,
            conditions: ConditionGroup::always(),
            actions: Vec::new(),
        }
    }

    /// Set the condition tree.
    pub fn with_conditions(mut self, conditions: ConditionGroup) -> Self {
        self.conditions = conditions;
        self
    }

    /// Append an action.
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}
