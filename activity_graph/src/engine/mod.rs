//! The behavior engine: event lifecycle state machine, behavior dispatch,
//! and cascade control.
//!
//! All entry points are synchronous and single-writer: a call runs to
//! completion, including any bounded cascade, before returning. In-session
//! problems are absorbed into the returned [`TickResult`]; nothing in here
//! raises across the tick boundary.

mod evaluator;
mod executor;
mod propagation;

pub use evaluator::*;
pub use executor::*;
pub use propagation::*;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use uuid::Uuid;

use world_model::{
    Action, Behavior, BehaviorId, EngineConfig, EventId, EventSpec, EventStatus, GameClock,
    NodeId, TriggerKind, WorldEvent,
};

use crate::graph::{BuiltWorld, WorldGraph};

/// What triggered a tick: an optional origin scope plus the current round.
#[derive(Debug, Clone, Default)]
pub struct TickContext {
    /// Restricts event evaluation to the origin's area when present.
    pub origin: Option<NodeId>,
    pub round: u64,
}

impl TickContext {
    /// A world-wide tick at the given round.
    pub fn at_round(round: u64) -> Self {
        Self {
            origin: None,
            round,
        }
    }

    /// Restrict evaluation to the scope around a node.
    pub fn with_origin(mut self, origin: impl Into<NodeId>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// One applied status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTransition {
    pub event: EventId,
    pub from: EventStatus,
    pub to: EventStatus,
}

/// What one external call did to the world.
#[derive(Debug, Clone, Default)]
pub struct TickResult {
    pub fired_behaviors: Vec<BehaviorId>,
    pub event_transitions: Vec<EventTransition>,
    /// Events whose emissions were processed inline as cascades.
    pub cascaded_events: Vec<EventId>,
    /// Events pushed past the cascade bound, waiting for the next tick.
    pub deferred_events: Vec<EventId>,
    pub action_failures: Vec<ActionFailure>,
    pub narrative_hints: Vec<String>,
}

impl TickResult {
    /// Fold another result into this one, preserving order.
    pub fn merge(&mut self, other: TickResult) {
        self.fired_behaviors.extend(other.fired_behaviors);
        self.event_transitions.extend(other.event_transitions);
        self.cascaded_events.extend(other.cascaded_events);
        self.deferred_events.extend(other.deferred_events);
        self.action_failures.extend(other.action_failures);
        self.narrative_hints.extend(other.narrative_hints);
    }

    /// Whether the call changed nothing and fired nothing.
    pub fn is_quiet(&self) -> bool {
        self.fired_behaviors.is_empty()
            && self.event_transitions.is_empty()
            && self.cascaded_events.is_empty()
            && self.deferred_events.is_empty()
    }
}

/// A lifecycle step decided during the planning phase of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PlannedStep {
    Arm,
    EnterCooldown,
    Rearm,
    Complete,
    Fail,
}

impl PlannedStep {
    fn target(self) -> EventStatus {
        match self {
            PlannedStep::Arm | PlannedStep::Rearm => EventStatus::Available,
            PlannedStep::EnterCooldown => EventStatus::Cooldown,
            PlannedStep::Complete => EventStatus::Completed,
            PlannedStep::Fail => EventStatus::Failed,
        }
    }
}

/// The single-session, single-writer runtime over a sealed world graph.
pub struct BehaviorEngine {
    graph: WorldGraph,
    events: HashMap<EventId, WorldEvent>,
    specs: HashMap<EventId, EventSpec>,
    behaviors: Vec<Behavior>,
    clock: GameClock,
    config: EngineConfig,
    session_id: Uuid,

    /// Event ids whose `on_complete` side effects have already been applied.
    /// Survives snapshot round-trips so crash recovery never double-grants.
    applied_effects: HashSet<EventId>,

    /// Emissions pushed past the cascade bound, drained by the next tick.
    deferred: VecDeque<EmittedEvent>,

    rewards: Box<dyn RewardSink>,
}

impl BehaviorEngine {
    /// Wrap a freshly built world.
    pub fn new(built: BuiltWorld, config: EngineConfig, rewards: Box<dyn RewardSink>) -> Self {
        Self {
            graph: built.graph,
            events: built.events,
            specs: built.specs,
            behaviors: built.behaviors,
            clock: GameClock::at(built.starting_round),
            config,
            session_id: built.session_id,
            applied_effects: HashSet::new(),
            deferred: VecDeque::new(),
            rewards,
        }
    }

    // ---- read access ----

    /// The underlying graph, read-only.
    pub fn graph(&self) -> &WorldGraph {
        &self.graph
    }

    /// Current status of an event instance.
    pub fn event_status(&self, id: &EventId) -> Option<EventStatus> {
        self.events.get(id).map(|instance| instance.status)
    }

    /// The event instance table, read-only.
    pub fn events(&self) -> &HashMap<EventId, WorldEvent> {
        &self.events
    }

    /// The game clock.
    pub fn clock(&self) -> &GameClock {
        &self.clock
    }

    /// The owning session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Dedup set of event ids whose completion side effects have applied.
    pub fn applied_effects(&self) -> &HashSet<EventId> {
        &self.applied_effects
    }

    pub(crate) fn graph_mut(&mut self) -> &mut WorldGraph {
        &mut self.graph
    }

    pub(crate) fn events_mut(&mut self) -> &mut HashMap<EventId, WorldEvent> {
        &mut self.events
    }

    pub(crate) fn clock_mut(&mut self) -> &mut GameClock {
        &mut self.clock
    }

    pub(crate) fn set_applied_effects(&mut self, applied: HashSet<EventId>) {
        self.applied_effects = applied;
    }

    // ---- entry points ----

    /// One evaluation pass: deferred emissions first, then on-tick
    /// behaviors, then the event lifecycle for the tick's scope.
    pub fn tick(&mut self, ctx: TickContext) -> TickResult {
        self.clock.advance_to(ctx.round);
        let mut result = TickResult::default();

        let backlog: Vec<EmittedEvent> = self.deferred.drain(..).collect();
        for emitted in backlog {
            self.process_emitted(emitted, 0, &mut result);
        }

        self.run_behaviors(TriggerKind::OnTick, None, 0, &mut result);

        let candidates = self.scoped_candidates(ctx.origin.as_ref());
        self.evaluate_lifecycle(&candidates, 0, &mut result);

        result
    }

    /// Propagation-triggered re-evaluation of dependent events.
    pub fn handle_event(&mut self, emitted: &EmittedEvent) -> TickResult {
        let mut result = TickResult::default();
        self.process_emitted(emitted.clone(), 0, &mut result);
        result
    }

    /// The player (or a companion) enters a scope: activate its available
    /// events and fire its on-enter behaviors.
    pub fn handle_enter(&mut self, node: &NodeId) -> TickResult {
        let mut result = TickResult::default();

        let scope_area = self.graph.containing_area(node);
        let mut to_activate: Vec<EventId> = self
            .events
            .iter()
            .filter(|(_, instance)| instance.status == EventStatus::Available)
            .filter(|(id, _)| match self.specs.get(*id) {
                Some(spec) => spec.area_id == *node || Some(&spec.area_id) == scope_area.as_ref(),
                None => false,
            })
            .map(|(id, _)| id.clone())
            .collect();
        to_activate.sort();

        for id in to_activate {
            self.apply_step(&id, EventStatus::Active, 0, &mut result);
        }

        let owners = self.scope_owner_set(node);
        self.run_behaviors(TriggerKind::OnEnter, Some(&owners), 0, &mut result);
        result
    }

    /// The player leaves a scope: fire its on-exit behaviors.
    pub fn handle_exit(&mut self, node: &NodeId) -> TickResult {
        let mut result = TickResult::default();
        let owners = self.scope_owner_set(node);
        self.run_behaviors(TriggerKind::OnExit, Some(&owners), 0, &mut result);
        result
    }

    /// Sanctioned external mutation: run an action list on behalf of an
    /// outside collaborator (combat resolution, scripted sequences).
    pub fn apply_actions(&mut self, actions: &[Action]) -> TickResult {
        let mut result = TickResult::default();
        let outcome = execute_actions(
            actions,
            &mut self.graph,
            &mut self.events,
            self.rewards.as_mut(),
            self.clock.round(),
        );
        self.absorb_outcome(outcome, 0, &mut result);
        result
    }

    /// Drop change-log records already persisted externally. Caller-driven;
    /// never happens implicitly.
    pub fn compact_change_log(&mut self, upto_seq: u64) {
        self.graph.compact_log(upto_seq);
    }

    // ---- internals ----

    /// Everything bound to a scope for enter/exit dispatch: the scope node
    /// itself plus its direct children.
    fn scope_owner_set(&self, node: &NodeId) -> HashSet<NodeId> {
        let mut owners: HashSet<NodeId> = HashSet::new();
        owners.insert(node.clone());
        for child in self.graph.get_children(node, None) {
            owners.insert(child.id.clone());
        }
        for entity in self.graph.entities_at(node) {
            owners.insert(entity.id.clone());
        }
        owners
    }

    /// Event ids eligible for a tick's lifecycle pass, sorted for
    /// determinism. With an origin, only events of the origin's area.
    fn scoped_candidates(&self, origin: Option<&NodeId>) -> Vec<EventId> {
        let area = origin.and_then(|node| self.graph.containing_area(node));
        let mut ids: Vec<EventId> = self
            .specs
            .iter()
            .filter(|(_, spec)| match (origin, &area) {
                (None, _) => true,
                (Some(node), area) => {
                    spec.area_id == *node || Some(&spec.area_id) == area.as_ref()
                }
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// One batch of the lifecycle state machine.
    ///
    /// Conditions for the whole batch are evaluated against one consistent
    /// graph state before any action runs; cascaded batches then re-evaluate
    /// against the mutated state.
    fn evaluate_lifecycle(&mut self, candidates: &[EventId], depth: u32, result: &mut TickResult) {
        let planned: Vec<(EventId, PlannedStep)> = {
            let ctx = EvalContext {
                graph: &self.graph,
                events: &self.events,
                clock: &self.clock,
            };
            candidates
                .iter()
                .filter_map(|id| {
                    let instance = self.events.get(id)?;
                    let spec = self.specs.get(id)?;
                    let step = match instance.status {
                        EventStatus::Locked => {
                            evaluate_group(&ctx, &spec.trigger_conditions)
                                .then_some(PlannedStep::Arm)
                        }
                        EventStatus::Active => {
                            let failed = spec
                                .failure_conditions
                                .as_ref()
                                .map(|conditions| evaluate_group(&ctx, conditions))
                                .unwrap_or(false);
                            if failed {
                                Some(PlannedStep::Fail)
                            } else {
                                evaluate_group(&ctx, &spec.completion_conditions)
                                    .then_some(PlannedStep::Complete)
                            }
                        }
                        EventStatus::Completed | EventStatus::Failed => {
                            spec.is_repeatable.then_some(PlannedStep::EnterCooldown)
                        }
                        EventStatus::Cooldown => {
                            let since = instance
                                .completed_at
                                .unwrap_or(instance.status_changed_at);
                            (self.clock.elapsed_since(since) >= spec.cooldown_rounds)
                                .then_some(PlannedStep::Rearm)
                        }
                        EventStatus::Available => None,
                    };
                    step.map(|step| (id.clone(), step))
                })
                .collect()
        };

        for (id, step) in planned {
            self.apply_step(&id, step.target(), depth, result);
        }
    }

    /// Apply one status transition, guarded by the state machine, and run
    /// any side effects it carries.
    fn apply_step(&mut self, id: &EventId, to: EventStatus, depth: u32, result: &mut TickResult) {
        let round = self.clock.round();
        let from = match self.events.get_mut(id) {
            Some(instance) => {
                let from = instance.status;
                if !from.can_transition_to(to) {
                    result.action_failures.push(ActionFailure {
                        index: 0,
                        reason: format!("illegal transition {from} -> {to} for `{id}`"),
                    });
                    return;
                }
                instance.status = to;
                instance.status_changed_at = round;
                if to == EventStatus::Completed {
                    instance.completions += 1;
                    instance.completed_at = Some(round);
                }
                from
            }
            None => return,
        };

        debug!(event = %id, %from, %to, round, "event transition");
        result.event_transitions.push(EventTransition {
            event: id.clone(),
            from,
            to,
        });

        match to {
            EventStatus::Completed => self.run_completion_effects(id, depth, result),
            EventStatus::Failed => self.run_failure_effects(id, depth, result),
            _ => {}
        }
    }

    /// Completion side effects, applied exactly once per event id across
    /// ticks, cascades, and restores.
    fn run_completion_effects(&mut self, id: &EventId, depth: u32, result: &mut TickResult) {
        if !self.applied_effects.insert(id.clone()) {
            debug!(event = %id, "completion side effects already applied; skipping");
            return;
        }
        let (actions, hint) = match self.specs.get(id) {
            Some(spec) => (spec.on_complete.clone(), spec.narrative_hint.clone()),
            None => return,
        };
        if let Some(hint) = hint {
            result.narrative_hints.push(hint);
        }
        let outcome = execute_actions(
            &actions,
            &mut self.graph,
            &mut self.events,
            self.rewards.as_mut(),
            self.clock.round(),
        );
        self.absorb_outcome(outcome, depth, result);
    }

    /// Failure side effects: a distinct, typically narrative-only set.
    fn run_failure_effects(&mut self, id: &EventId, depth: u32, result: &mut TickResult) {
        let actions = match self.specs.get(id) {
            Some(spec) => spec.on_fail.clone(),
            None => return,
        };
        let outcome = execute_actions(
            &actions,
            &mut self.graph,
            &mut self.events,
            self.rewards.as_mut(),
            self.clock.round(),
        );
        self.absorb_outcome(outcome, depth, result);
    }

    /// Evaluate and fire behaviors of one trigger kind as a single batch.
    fn run_behaviors(
        &mut self,
        trigger: TriggerKind,
        owner_filter: Option<&HashSet<NodeId>>,
        depth: u32,
        result: &mut TickResult,
    ) {
        let fired: Vec<(BehaviorId, Vec<Action>)> = {
            let ctx = EvalContext {
                graph: &self.graph,
                events: &self.events,
                clock: &self.clock,
            };
            self.behaviors
                .iter()
                .filter(|behavior| behavior.trigger == trigger)
                .filter(|behavior| {
                    owner_filter.map_or(true, |owners| owners.contains(&behavior.owner))
                })
                .filter(|behavior| evaluate_group(&ctx, &behavior.conditions))
                .map(|behavior| (behavior.id.clone(), behavior.actions.clone()))
                .collect()
        };

        for (id, actions) in fired {
            result.fired_behaviors.push(id);
            let outcome = execute_actions(
                &actions,
                &mut self.graph,
                &mut self.events,
                self.rewards.as_mut(),
                self.clock.round(),
            );
            self.absorb_outcome(outcome, depth, result);
        }
    }

    /// Fold an action outcome into the tick result, cascading any emissions.
    fn absorb_outcome(&mut self, outcome: ActionOutcome, depth: u32, result: &mut TickResult) {
        for event in outcome.unlocked {
            result.event_transitions.push(EventTransition {
                event,
                from: EventStatus::Locked,
                to: EventStatus::Available,
            });
        }
        result.narrative_hints.extend(outcome.narrative_hints);
        result.action_failures.extend(outcome.failures);

        for emitted in outcome.emitted {
            self.process_emitted(emitted, depth + 1, result);
        }
    }

    /// Handle one emission: propagate it, fire on-event behaviors for the
    /// reached nodes, and re-evaluate dependent events. Past the cascade
    /// bound the emission is deferred to the next explicit tick.
    fn process_emitted(&mut self, emitted: EmittedEvent, depth: u32, result: &mut TickResult) {
        if depth > self.config.max_cascade_depth {
            debug!(
                event = %emitted.event,
                depth,
                max = self.config.max_cascade_depth,
                "cascade bound reached; deferring"
            );
            result.deferred_events.push(emitted.event.clone());
            self.deferred.push_back(emitted);
            return;
        }
        if depth > 0 {
            result.cascaded_events.push(emitted.event.clone());
        }

        let hits = propagate(&emitted, &self.graph, &self.config.propagation);
        let hit_nodes: HashSet<NodeId> = hits.iter().map(|hit| hit.node.clone()).collect();

        self.run_behaviors(TriggerKind::OnEventReceived, Some(&hit_nodes), depth, result);

        // Areas touched by the spread, for scoping dependent events.
        let mut hit_areas: HashSet<NodeId> = HashSet::new();
        for node in &hit_nodes {
            if let Some(area) = self.graph.containing_area(node) {
                hit_areas.insert(area);
            }
        }

        let mut dependent: Vec<EventId> = self
            .specs
            .iter()
            .filter(|(id, spec)| {
                if **id == emitted.event {
                    return false;
                }
                hit_nodes.contains(&spec.area_id)
                    || hit_areas.contains(&spec.area_id)
                    || spec.trigger_conditions.references_event(&emitted.event)
                    || spec.completion_conditions.references_event(&emitted.event)
                    || spec
                        .failure_conditions
                        .as_ref()
                        .map_or(false, |conditions| {
                            conditions.references_event(&emitted.event)
                        })
            })
            .map(|(id, _)| id.clone())
            .collect();
        dependent.sort();

        self.evaluate_lifecycle(&dependent, depth, result);
    }
}
