//! Action execution: the only code path that writes to a live graph.
//!
//! Actions run in strict list order. A failing action is recorded and the
//! rest of the list still runs; a single declarative rule may carry
//! independent effects, so failures are isolated, never fail-fast.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use world_model::{
    Action, EventId, EventStatus, NodeId, PropagationScope, StateValue, WorldEvent,
};

use crate::graph::WorldGraph;

/// The external inventory/experience collaborator invoked by grant-reward
/// actions.
///
/// Implementations should be idempotent per call site: the engine's dedup
/// set prevents the *triggering* event from firing twice, but cannot protect
/// against the collaborator being called out of band.
pub trait RewardSink {
    fn add_item(&mut self, recipient: &NodeId, item: &str, quantity: u32);
    fn add_xp(&mut self, recipient: &NodeId, amount: u64);
    fn add_gold(&mut self, recipient: &NodeId, amount: u64);
}

/// A sink that drops every grant. Useful when no inventory system is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRewardSink;

impl RewardSink for NullRewardSink {
    fn add_item(&mut self, _recipient: &NodeId, _item: &str, _quantity: u32) {}
    fn add_xp(&mut self, _recipient: &NodeId, _amount: u64) {}
    fn add_gold(&mut self, _recipient: &NodeId, _amount: u64) {}
}

/// One recorded grant, as seen by [`RecordingRewardSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum RewardGrant {
    Item {
        recipient: NodeId,
        item: String,
        quantity: u32,
    },
    Xp {
        recipient: NodeId,
        amount: u64,
    },
    Gold {
        recipient: NodeId,
        amount: u64,
    },
}

/// A sink that records every grant it receives. The exactly-once witness in
/// tests, and a useful tap for narrative output.
#[derive(Debug, Clone, Default)]
pub struct RecordingRewardSink {
    pub grants: Vec<RewardGrant>,
}

impl RewardSink for RecordingRewardSink {
    fn add_item(&mut self, recipient: &NodeId, item: &str, quantity: u32) {
        self.grants.push(RewardGrant::Item {
            recipient: recipient.clone(),
            item: item.to_string(),
            quantity,
        });
    }

    fn add_xp(&mut self, recipient: &NodeId, amount: u64) {
        self.grants.push(RewardGrant::Xp {
            recipient: recipient.clone(),
            amount,
        });
    }

    fn add_gold(&mut self, recipient: &NodeId, amount: u64) {
        self.grants.push(RewardGrant::Gold {
            recipient: recipient.clone(),
            amount,
        });
    }
}

/// Lets a caller keep a handle on the sink it hands to the engine.
impl<T: RewardSink> RewardSink for std::rc::Rc<std::cell::RefCell<T>> {
    fn add_item(&mut self, recipient: &NodeId, item: &str, quantity: u32) {
        self.borrow_mut().add_item(recipient, item, quantity);
    }

    fn add_xp(&mut self, recipient: &NodeId, amount: u64) {
        self.borrow_mut().add_xp(recipient, amount);
    }

    fn add_gold(&mut self, recipient: &NodeId, amount: u64) {
        self.borrow_mut().add_gold(recipient, amount);
    }
}

/// An event occurrence minted by an emit-event action, ready for
/// propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    /// Unique per occurrence; distinguishes repeat firings of one event.
    pub occurrence: Uuid,
    pub event: EventId,
    pub origin: NodeId,
    pub scope: PropagationScope,
    pub strength: f32,
}

impl EmittedEvent {
    /// Mint a fresh occurrence.
    pub fn new(event: EventId, origin: NodeId, scope: PropagationScope, strength: f32) -> Self {
        Self {
            occurrence: Uuid::new_v4(),
            event,
            origin,
            scope,
            strength,
        }
    }
}

/// One state write applied by an action, surfaced for the narrative layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateWrite {
    pub node: NodeId,
    pub key: String,
    pub value: StateValue,
}

/// A recorded per-action failure. Failures are data in the result, never
/// errors crossing the tick boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    /// Position in the executed action list.
    pub index: usize,
    pub reason: String,
}

/// Net effect of executing one action list.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub state_changes: Vec<StateWrite>,
    pub emitted: Vec<EmittedEvent>,
    pub spawned: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    /// Events flipped locked -> available by unlock actions.
    pub unlocked: Vec<EventId>,
    pub narrative_hints: Vec<String>,
    pub failures: Vec<ActionFailure>,
}

impl ActionOutcome {
    /// Fold another outcome into this one, preserving order.
    pub fn merge(&mut self, other: ActionOutcome) {
        self.state_changes.extend(other.state_changes);
        self.emitted.extend(other.emitted);
        self.spawned.extend(other.spawned);
        self.removed.extend(other.removed);
        self.unlocked.extend(other.unlocked);
        self.narrative_hints.extend(other.narrative_hints);
        self.failures.extend(other.failures);
    }
}

/// Execute an ordered action list against the graph.
///
/// Only this function (and snapshot restore) writes to a sealed graph; every
/// mutation goes through the container's logged API.
pub fn execute_actions(
    actions: &[Action],
    graph: &mut WorldGraph,
    events: &mut HashMap<EventId, WorldEvent>,
    rewards: &mut dyn RewardSink,
    round: u64,
) -> ActionOutcome {
    let mut outcome = ActionOutcome::default();

    for (index, action) in actions.iter().enumerate() {
        let mut fail = |outcome: &mut ActionOutcome, reason: String| {
            debug!(index, %reason, "action failed; continuing with the rest of the list");
            outcome.failures.push(ActionFailure { index, reason });
        };

        match action {
            Action::SetState { node, key, value } => {
                match graph.set_state(node, key, value.clone()) {
                    Ok(()) => outcome.state_changes.push(StateWrite {
                        node: node.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    }),
                    Err(err) => fail(&mut outcome, err.to_string()),
                }
            }

            Action::AdjustState { node, key, delta } => {
                match graph.adjust_state(node, key, *delta) {
                    Ok(value) => outcome.state_changes.push(StateWrite {
                        node: node.clone(),
                        key: key.clone(),
                        value: StateValue::Int(value),
                    }),
                    Err(err) => fail(&mut outcome, err.to_string()),
                }
            }

            Action::EmitEvent {
                event,
                origin,
                scope,
                strength,
            } => {
                if !events.contains_key(event) {
                    fail(&mut outcome, format!("emit targets unknown event `{event}`"));
                } else if !graph.contains_node(origin) {
                    fail(
                        &mut outcome,
                        format!("emit origin `{origin}` is not in the graph"),
                    );
                } else {
                    outcome.emitted.push(EmittedEvent::new(
                        event.clone(),
                        origin.clone(),
                        *scope,
                        *strength,
                    ));
                }
            }

            Action::SpawnNode { seed, at } => {
                if !graph.contains_node(at) {
                    fail(
                        &mut outcome,
                        format!("spawn parent `{at}` is not in the graph"),
                    );
                } else {
                    let id = seed.id.clone();
                    match graph.spawn_node(seed.clone(), round) {
                        Ok(()) => {
                            // Attach the newcomer under its parent scope.
                            if let Err(err) = graph.add_edge(world_model::EdgeSpec::new(
                                at.clone(),
                                id.clone(),
                                world_model::EdgeType::Contains,
                            )) {
                                fail(&mut outcome, err.to_string());
                            }
                            outcome.spawned.push(id);
                        }
                        Err(err) => fail(&mut outcome, err.to_string()),
                    }
                }
            }

            Action::RemoveNode { node } => match graph.retire_node(node) {
                Ok(_) => outcome.removed.push(node.clone()),
                Err(err) => fail(&mut outcome, err.to_string()),
            },

            Action::UnlockBehavior { event } => match events.get_mut(event) {
                Some(instance) => {
                    if instance.status.can_transition_to(EventStatus::Available) {
                        instance.status = EventStatus::Available;
                        instance.status_changed_at = round;
                        outcome.unlocked.push(event.clone());
                    } else {
                        fail(
                            &mut outcome,
                            format!(
                                "cannot unlock `{event}` from status {}",
                                instance.status
                            ),
                        );
                    }
                }
                None => fail(&mut outcome, format!("unlock targets unknown event `{event}`")),
            },

            Action::GrantReward { recipient, reward } => {
                for grant in &reward.items {
                    rewards.add_item(recipient, &grant.item, grant.quantity);
                }
                if reward.xp > 0 {
                    rewards.add_xp(recipient, reward.xp);
                }
                if reward.gold > 0 {
                    rewards.add_gold(recipient, reward.gold);
                }
                if let Some(hint) = &reward.narrative_hint {
                    outcome.narrative_hints.push(hint.clone());
                }
            }
        }
    }

    outcome
}
