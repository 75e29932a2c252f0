//! Snapshots: the serializable delta between a freshly built graph and its
//! current runtime state.
//!
//! Capture reads the container's change log and the engine's event table; it
//! never mutates either. Restore re-applies the delta onto a freshly built
//! graph of the same session. Loading is deliberately lenient: a corrupted
//! or partially written record degrades to documented defaults, because
//! refusing to resume a session is worse than resuming with best-effort
//! state.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use world_model::{EdgeSpec, EdgeType, EventId, EventStatus, NodeId, NodeSeed, StateValue};

use crate::engine::BehaviorEngine;
use crate::graph::{ChangeRecord, GraphChange};

/// An edge addition or removal relative to the sealed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeChangeRecord {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
}

impl EdgeChangeRecord {
    fn from_edge(edge: &EdgeSpec) -> Self {
        Self {
            source: edge.source.clone(),
            target: edge.target.clone(),
            edge_type: edge.edge_type,
            weight: edge.weight,
        }
    }

    fn to_edge(&self) -> EdgeSpec {
        let mut edge = EdgeSpec::new(self.source.clone(), self.target.clone(), self.edge_type);
        edge.weight = self.weight;
        edge
    }

    fn matches(&self, edge: &EdgeSpec) -> bool {
        self.source == edge.source && self.target == edge.target && self.edge_type == edge.edge_type
    }
}

/// A node spawned after sealing, with the round it appeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnedNode {
    pub seed: NodeSeed,
    #[serde(default)]
    pub round: u64,
}

/// Shape changes relative to the sealed graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StructuralDeltas {
    #[serde(default)]
    pub spawned: Vec<SpawnedNode>,
    #[serde(default)]
    pub removed: Vec<NodeId>,
    #[serde(default)]
    pub edges_added: Vec<EdgeChangeRecord>,
    #[serde(default)]
    pub edges_removed: Vec<EdgeChangeRecord>,
}

/// Instance history beyond the bare status, needed to resume cooldowns and
/// completion counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventHistory {
    #[serde(default)]
    pub status_changed_at: u64,
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub completions: u32,
}

fn default_captured_at() -> DateTime<Utc> {
    Utc::now()
}

/// The persisted delta for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    #[serde(default)]
    pub session_id: Uuid,

    /// The game round at capture time.
    #[serde(default)]
    pub round: u64,

    /// Latest value per key per node since sealing; not a full history.
    #[serde(default)]
    pub node_state_overwrites: HashMap<NodeId, HashMap<String, StateValue>>,

    #[serde(default)]
    pub structural_deltas: StructuralDeltas,

    /// Status per event id. Events absent here restore to the definition
    /// default, `locked`.
    #[serde(default)]
    pub event_status: HashMap<EventId, EventStatus>,

    #[serde(default)]
    pub event_history: HashMap<EventId, EventHistory>,

    /// Event ids whose completion side effects have already been applied.
    /// Missing on load means an empty set.
    #[serde(default)]
    pub applied_side_effects: HashSet<EventId>,

    #[serde(default = "default_captured_at")]
    pub captured_at: DateTime<Utc>,
}

impl WorldSnapshot {
    fn empty() -> Self {
        Self {
            session_id: Uuid::nil(),
            round: 0,
            node_state_overwrites: HashMap::new(),
            structural_deltas: StructuralDeltas::default(),
            event_status: HashMap::new(),
            event_history: HashMap::new(),
            applied_side_effects: HashSet::new(),
            captured_at: Utc::now(),
        }
    }

    /// Serialize to the stable external shape.
    pub fn to_json_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "snapshot serialization failed; persisting empty record");
                Value::Null
            }
        }
    }

    /// Deserialize from the external shape, tolerating missing or garbled
    /// keys. Every field degrades to its documented default; this is the
    /// path by which a partially written record survives crash recovery.
    pub fn from_json_value(value: &Value) -> Self {
        let map = match value.as_object() {
            Some(map) => map,
            None => {
                warn!("snapshot record is not an object; resuming from an empty delta");
                return Self::empty();
            }
        };

        fn field<T: DeserializeOwned + Default>(
            map: &serde_json::Map<String, Value>,
            key: &str,
        ) -> T {
            match map.get(key) {
                None => T::default(),
                Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
                    warn!(key, %err, "garbled snapshot key; using default");
                    T::default()
                }),
            }
        }

        // Event statuses are recovered entry by entry so one garbled status
        // does not discard the rest of the table.
        let mut event_status = HashMap::new();
        if let Some(statuses) = map.get("event_status").and_then(Value::as_object) {
            for (id, status) in statuses {
                match serde_json::from_value::<EventStatus>(status.clone()) {
                    Ok(status) => {
                        event_status.insert(EventId::new(id.clone()), status);
                    }
                    Err(err) => {
                        warn!(event = %id, %err, "garbled event status; event will resume locked");
                    }
                }
            }
        }

        let captured_at = map
            .get("captured_at")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_else(Utc::now);

        Self {
            session_id: field(map, "session_id"),
            round: field(map, "round"),
            node_state_overwrites: field(map, "node_state_overwrites"),
            structural_deltas: field(map, "structural_deltas"),
            event_status,
            event_history: field(map, "event_history"),
            applied_side_effects: field(map, "applied_side_effects"),
            captured_at,
        }
    }
}

/// Fold a change log into latest-value state overwrites and net structural
/// deltas. Add-then-remove pairs cancel.
pub(crate) fn fold_changes(
    records: &[ChangeRecord],
) -> (
    HashMap<NodeId, HashMap<String, StateValue>>,
    StructuralDeltas,
) {
    let mut overwrites: HashMap<NodeId, HashMap<String, StateValue>> = HashMap::new();
    let mut deltas = StructuralDeltas::default();

    for record in records {
        match &record.change {
            GraphChange::StateSet { node, key, new, .. } => {
                overwrites
                    .entry(node.clone())
                    .or_default()
                    .insert(key.clone(), new.clone());
            }
            GraphChange::NodeSpawned { seed, round } => {
                deltas.spawned.push(SpawnedNode {
                    seed: seed.clone(),
                    round: *round,
                });
            }
            GraphChange::NodeRemoved { node } => {
                if let Some(pos) = deltas
                    .spawned
                    .iter()
                    .position(|spawned| spawned.seed.id == *node)
                {
                    // A node spawned and removed within the delta never
                    // existed as far as restore is concerned.
                    deltas.spawned.remove(pos);
                } else {
                    deltas.removed.push(node.clone());
                }
                overwrites.remove(node);
            }
            GraphChange::EdgeAdded { edge } => {
                if let Some(pos) = deltas
                    .edges_removed
                    .iter()
                    .position(|record| record.matches(edge))
                {
                    deltas.edges_removed.remove(pos);
                } else {
                    deltas.edges_added.push(EdgeChangeRecord::from_edge(edge));
                }
            }
            GraphChange::EdgeRemoved { edge } => {
                if let Some(pos) = deltas
                    .edges_added
                    .iter()
                    .position(|record| record.matches(edge))
                {
                    deltas.edges_added.remove(pos);
                } else {
                    deltas.edges_removed.push(EdgeChangeRecord::from_edge(edge));
                }
            }
        }
    }

    (overwrites, deltas)
}

impl BehaviorEngine {
    /// Capture the accumulated delta since sealing. Reads the change log
    /// without truncating it; compaction stays a separate, caller-driven
    /// call.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        let (node_state_overwrites, structural_deltas) =
            fold_changes(self.graph().changes_since(0));

        let mut event_status = HashMap::new();
        let mut event_history = HashMap::new();
        for (id, instance) in self.events() {
            event_status.insert(id.clone(), instance.status);
            event_history.insert(
                id.clone(),
                EventHistory {
                    status_changed_at: instance.status_changed_at,
                    completed_at: instance.completed_at,
                    completions: instance.completions,
                },
            );
        }

        WorldSnapshot {
            session_id: self.session_id(),
            round: self.clock().round(),
            node_state_overwrites,
            structural_deltas,
            event_status,
            event_history,
            applied_side_effects: self.applied_effects().clone(),
            captured_at: Utc::now(),
        }
    }

    /// Re-apply a captured delta onto a freshly built graph of the same
    /// session. Best-effort: anything the snapshot references that the
    /// rebuilt world no longer has is logged and skipped, never fatal.
    pub fn restore_snapshot(&mut self, snapshot: &WorldSnapshot) {
        self.clock_mut().advance_to(snapshot.round);

        for spawned in &snapshot.structural_deltas.spawned {
            if let Err(err) = self
                .graph_mut()
                .spawn_node(spawned.seed.clone(), spawned.round)
            {
                warn!(node = %spawned.seed.id, %err, "skipping spawned node from snapshot");
            }
        }
        for edge in &snapshot.structural_deltas.edges_added {
            if let Err(err) = self.graph_mut().add_edge(edge.to_edge()) {
                warn!(source = %edge.source, target = %edge.target, %err,
                    "skipping added edge from snapshot");
            }
        }
        for node in &snapshot.structural_deltas.removed {
            if let Err(err) = self.graph_mut().retire_node(node) {
                warn!(%node, %err, "skipping node removal from snapshot");
            }
        }
        for edge in &snapshot.structural_deltas.edges_removed {
            if let Err(err) = self
                .graph_mut()
                .remove_edge(&edge.source, &edge.target, edge.edge_type)
            {
                warn!(source = %edge.source, target = %edge.target, %err,
                    "skipping edge removal from snapshot");
            }
        }

        for (node, entries) in &snapshot.node_state_overwrites {
            for (key, value) in entries {
                if let Err(err) = self.graph_mut().set_state(node, key, value.clone()) {
                    warn!(%node, key, %err, "skipping state overwrite from snapshot");
                }
            }
        }

        // Events absent from the snapshot keep their definition default
        // (locked); events unknown to the rebuilt world are skipped.
        for (id, status) in &snapshot.event_status {
            match self.events_mut().get_mut(id) {
                Some(instance) => {
                    instance.status = *status;
                    match snapshot.event_history.get(id) {
                        Some(entry) => {
                            instance.status_changed_at = entry.status_changed_at;
                            instance.completed_at = entry.completed_at;
                            instance.completions = entry.completions;
                        }
                        None => instance.status_changed_at = snapshot.round,
                    }
                }
                None => {
                    warn!(event = %id, "snapshot references unknown event; skipping");
                }
            }
        }

        self.set_applied_effects(snapshot.applied_side_effects.clone());
    }
}
