//! Condition evaluation: pure, deterministic, fail-closed.
//!
//! Evaluation never mutates anything and never raises. A condition that
//! references a missing node, key, or event evaluates to `false` and logs a
//! warning; a malformed rule must not abort a game turn. Given identical
//! graph state, evaluation is referentially transparent, which is what makes
//! re-ticking idempotent.

use std::collections::HashMap;
use tracing::warn;

use world_model::{Condition, ConditionGroup, EventId, GameClock, WorldEvent};

use crate::graph::WorldGraph;

/// Everything a condition may read. Shared immutably across a whole batch so
/// the batch observes one consistent graph state.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub graph: &'a WorldGraph,
    pub events: &'a HashMap<EventId, WorldEvent>,
    pub clock: &'a GameClock,
}

/// Evaluate a condition tree, short-circuiting left to right.
///
/// An empty `All` is vacuously true; an empty `Any` is vacuously false.
pub fn evaluate_group(ctx: &EvalContext<'_>, group: &ConditionGroup) -> bool {
    match group {
        ConditionGroup::Leaf(condition) => evaluate_leaf(ctx, condition),
        ConditionGroup::All(groups) => groups.iter().all(|g| evaluate_group(ctx, g)),
        ConditionGroup::Any(groups) => groups.iter().any(|g| evaluate_group(ctx, g)),
        ConditionGroup::Not(group) => !evaluate_group(ctx, group),
    }
}

/// Evaluate a single leaf condition against current graph state.
pub fn evaluate_leaf(ctx: &EvalContext<'_>, condition: &Condition) -> bool {
    match condition {
        Condition::StateEquals { node, key, value } => match lookup_state(ctx, node, key) {
            Some(current) => current.loosely_equals(value),
            None => false,
        },

        Condition::StateAbove {
            node,
            key,
            threshold,
        } => match lookup_state(ctx, node, key) {
            Some(current) => {
                matches!(current.compare(threshold), Some(std::cmp::Ordering::Greater))
            }
            None => false,
        },

        Condition::StateBelow {
            node,
            key,
            threshold,
        } => match lookup_state(ctx, node, key) {
            Some(current) => matches!(current.compare(threshold), Some(std::cmp::Ordering::Less)),
            None => false,
        },

        Condition::NodeExists { node } => ctx.graph.contains_node(node),

        Condition::RelationExists {
            source,
            target,
            edge_type,
        } => ctx.graph.edge_between(source, target, *edge_type).is_some(),

        Condition::EventStatusIs { event, status } => match ctx.events.get(event) {
            Some(instance) => instance.status == *status,
            None => {
                warn!(event = %event, "condition references unknown event; evaluating false");
                false
            }
        },

        Condition::TimeElapsedSince { event, rounds } => match ctx.events.get(event) {
            Some(instance) => ctx.clock.elapsed_since(instance.status_changed_at) >= *rounds,
            None => {
                warn!(event = %event, "condition references unknown event; evaluating false");
                false
            }
        },

        Condition::FlagSet { node, flag } => lookup_state(ctx, node, flag)
            .map(|value| value.truthy())
            .unwrap_or(false),

        Condition::CounterAtLeast {
            node,
            counter,
            threshold,
        } => lookup_state(ctx, node, counter)
            .and_then(|value| value.as_int())
            .map(|current| current >= *threshold)
            .unwrap_or(false),

        Condition::EventCompleted { event } => match ctx.events.get(event) {
            Some(instance) => instance.has_completed(),
            None => {
                warn!(event = %event, "condition references unknown event; evaluating false");
                false
            }
        },
    }
}

fn lookup_state<'a>(
    ctx: &EvalContext<'a>,
    node: &world_model::NodeId,
    key: &str,
) -> Option<&'a world_model::StateValue> {
    match ctx.graph.get_node(node) {
        Some(found) => {
            let value = found.state_value(key);
            if value.is_none() {
                warn!(node = %node, key, "condition references missing state key; evaluating false");
            }
            value
        }
        None => {
            warn!(node = %node, "condition references missing node; evaluating false");
            None
        }
    }
}
