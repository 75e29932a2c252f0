//! Event definitions and the six-state event lifecycle.

use serde::{Deserialize, Serialize};

use crate::behavior::{Action, ConditionGroup};
use crate::node::NodeId;

/// Stable identifier for an authored event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Create an event id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// View the id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an event instance.
///
/// The legal transitions form a six-state machine:
/// `locked -> available -> active -> (completed | failed) -> cooldown -> available`,
/// where the cooldown loop applies only to repeatable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Locked,
    Available,
    Active,
    Completed,
    Failed,
    Cooldown,
}

impl EventStatus {
    /// Whether `next` is reachable from this status via exactly one edge of
    /// the state machine. Repeatability is enforced by the engine, not here.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Locked, Available)
                | (Available, Active)
                | (Active, Completed)
                | (Active, Failed)
                | (Completed, Cooldown)
                | (Failed, Cooldown)
                | (Cooldown, Available)
        )
    }

    /// Whether the status is one of the resting terminal states for
    /// non-repeatable events.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EventStatus::Locked => "locked",
            EventStatus::Available => "available",
            EventStatus::Active => "active",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Cooldown => "cooldown",
        };
        write!(f, "{label}")
    }
}

/// How far an emitted event's influence travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropagationScope {
    /// Confined to the origin node.
    Local,
    /// Confined to the origin's area subgraph.
    #[default]
    Area,
    /// May cross area boundaries; for world-significant events.
    Global,
}

/// An authored event definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub id: EventId,

    /// The area whose scope the event belongs to.
    pub area_id: NodeId,

    /// Optional owning chapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<NodeId>,

    /// Conditions arming the event (`locked -> available`).
    #[serde(default = "ConditionGroup::always")]
    pub trigger_conditions: ConditionGroup,

    /// Conditions completing the event (`active -> completed`).
    #[serde(default = "ConditionGroup::always")]
    pub completion_conditions: ConditionGroup,

    /// Conditions failing the event (`active -> failed`); absent means the
    /// event can only fail through an authored failure trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_conditions: Option<ConditionGroup>,

    /// Side effects applied exactly once on completion.
    #[serde(default)]
    pub on_complete: Vec<Action>,

    /// Side effects applied on failure; a distinct, typically smaller set.
    #[serde(default)]
    pub on_fail: Vec<Action>,

    #[serde(default)]
    pub cooldown_rounds: u64,

    #[serde(default)]
    pub is_repeatable: bool,

    /// How far the event's influence propagates when emitted.
    #[serde(default)]
    pub scope: PropagationScope,

    /// Authored prose hint surfaced to the narrative layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative_hint: Option<String>,
}

impl EventSpec {
    /// Create a definition bound to an area, with wide-open conditions.
    pub fn new(id: impl Into<EventId>, area_id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            area_id: area_id.into(),
            chapter_id: None,
            trigger_conditions: ConditionGroup::always(),
            completion_conditions: ConditionGroup::always(),
            failure_conditions: None,
            on_complete: Vec::new(),
            on_fail: Vec::new(),
            cooldown_rounds: 0,
            is_repeatable: false,
            scope: PropagationScope::Area,
            narrative_hint: None,
        }
    }

    /// Set the arming conditions.
    pub fn with_trigger(mut self, conditions: ConditionGroup) -> Self {
        self.trigger_conditions = conditions;
        self
    }

    /// Set the completion conditions.
    pub fn with_completion(mut self, conditions: ConditionGroup) -> Self {
        self.completion_conditions = conditions;
        self
    }

    /// Set the failure conditions.
    pub fn with_failure(mut self, conditions: ConditionGroup) -> Self {
        self.failure_conditions = Some(conditions);
        self
    }

    /// Append a completion side effect.
    pub fn with_on_complete(mut self, action: Action) -> Self {
        self.on_complete.push(action);
        self
    }

    /// Append a failure side effect.
    pub fn with_on_fail(mut self, action: Action) -> Self {
        self.on_fail.push(action);
        self
    }

    /// Mark the event repeatable with the given cooldown.
    pub fn repeatable(mut self, cooldown_rounds: u64) -> Self {
        self.is_repeatable = true;
        self.cooldown_rounds = cooldown_rounds;
        self
    }

    /// Set the propagation scope.
    pub fn with_scope(mut self, scope: PropagationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the narrative hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.narrative_hint = Some(hint.into());
        self
    }
}

/// Runtime instance state of an event definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub id: EventId,
    pub status: EventStatus,

    /// Round of the most recent status change.
    pub status_changed_at: u64,

    /// Round of the most recent completion, if any. Cooldowns are measured
    /// from this round.
    pub completed_at: Option<u64>,

    /// How many times the event has completed; stays non-zero after a
    /// repeatable event re-arms.
    pub completions: u32,
}

impl WorldEvent {
    /// A fresh instance in the default `Locked` status.
    pub fn new(id: EventId) -> Self {
        Self {
            id,
            status: EventStatus::default(),
            status_changed_at: 0,
            completed_at: None,
            completions: 0,
        }
    }

    /// Whether the event has ever completed.
    pub fn has_completed(&self) -> bool {
        self.completions > 0 || self.status == EventStatus::Completed
    }
}
