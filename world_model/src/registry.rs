//! The static content registry: everything the graph builder consumes.
//!
//! A registry is authored offline (TOML), validated offline, and read exactly
//! once at graph construction time. Malformed content is fatal; a session
//! never starts on a registry that fails validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::behavior::{Action, Behavior, BehaviorId};
use crate::edge::{EdgeSpec, EdgeType};
use crate::event::{EventId, EventSpec};
use crate::node::{NodeId, NodeSeed, NodeType};

/// Content problems that prevent a session from starting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContentError {
    #[error("duplicate node id `{0}`")]
    DuplicateNode(NodeId),

    #[error("duplicate event id `{0}`")]
    DuplicateEvent(EventId),

    #[error("duplicate behavior id `{0}`")]
    DuplicateBehavior(BehaviorId),

    #[error("edge {src} -> {target} ({edge_type:?}) references unknown node `{missing}`")]
    DanglingEdge {
        src: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        missing: NodeId,
    },

    #[error("behavior `{behavior}` is bound to unknown node `{owner}`")]
    UnknownBehaviorOwner {
        behavior: BehaviorId,
        owner: NodeId,
    },

    #[error("event `{event}` belongs to `{area}`, which is not an area node")]
    InvalidEventArea { event: EventId, area: NodeId },

    #[error("{context} references unknown event `{event}`")]
    UnknownActionEvent { context: String, event: EventId },
}

/// Parse/serialize failures for the TOML authoring format.
#[derive(Debug, Error)]
pub enum ContentFormatError {
    #[error("failed to parse content: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize content: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The static world content consumed at graph-construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContentRegistry {
    #[serde(default)]
    pub nodes: Vec<NodeSeed>,

    #[serde(default)]
    pub edges: Vec<EdgeSpec>,

    #[serde(default)]
    pub events: Vec<EventSpec>,

    #[serde(default)]
    pub behaviors: Vec<Behavior>,
}

impl ContentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node seed.
    pub fn with_node(mut self, seed: NodeSeed) -> Self {
        self.nodes.push(seed);
        self
    }

    /// Append an edge.
    pub fn with_edge(mut self, edge: EdgeSpec) -> Self {
        self.edges.push(edge);
        self
    }

    /// Append an event definition.
    pub fn with_event(mut self, event: EventSpec) -> Self {
        self.events.push(event);
        self
    }

    /// Append a behavior.
    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Load a registry from its TOML authoring format.
    pub fn from_toml_str(content: &str) -> Result<Self, ContentFormatError> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize the registry back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ContentFormatError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Offline validation. Collects every violation rather than stopping at
    /// the first so content authors see the full picture in one pass.
    pub fn validate(&self) -> Result<(), Vec<ContentError>> {
        let mut errors = Vec::new();

        let mut node_ids: HashSet<&NodeId> = HashSet::new();
        for seed in &self.nodes {
            if !node_ids.insert(&seed.id) {
                errors.push(ContentError::DuplicateNode(seed.id.clone()));
            }
        }

        let mut event_ids: HashSet<&EventId> = HashSet::new();
        for event in &self.events {
            if !event_ids.insert(&event.id) {
                errors.push(ContentError::DuplicateEvent(event.id.clone()));
            }
        }

        let mut behavior_ids: HashSet<&BehaviorId> = HashSet::new();
        for behavior in &self.behaviors {
            if !behavior_ids.insert(&behavior.id) {
                errors.push(ContentError::DuplicateBehavior(behavior.id.clone()));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !node_ids.contains(endpoint) {
                    errors.push(ContentError::DanglingEdge {
                        src: edge.source.clone(),
                        target: edge.target.clone(),
                        edge_type: edge.edge_type,
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        for behavior in &self.behaviors {
            if !node_ids.contains(&behavior.owner) {
                errors.push(ContentError::UnknownBehaviorOwner {
                    behavior: behavior.id.clone(),
                    owner: behavior.owner.clone(),
                });
            }
            self.check_actions(
                &behavior.actions,
                &event_ids,
                format!("behavior `{}`", behavior.id),
                &mut errors,
            );
        }

        for event in &self.events {
            let area_ok = self
                .nodes
                .iter()
                .any(|seed| seed.id == event.area_id && seed.node_type == NodeType::Area);
            if !area_ok {
                errors.push(ContentError::InvalidEventArea {
                    event: event.id.clone(),
                    area: event.area_id.clone(),
                });
            }
            self.check_actions(
                &event.on_complete,
                &event_ids,
                format!("event `{}` on_complete", event.id),
                &mut errors,
            );
            self.check_actions(
                &event.on_fail,
                &event_ids,
                format!("event `{}` on_fail", event.id),
                &mut errors,
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_actions(
        &self,
        actions: &[Action],
        event_ids: &HashSet<&EventId>,
        context: String,
        errors: &mut Vec<ContentError>,
    ) {
        for action in actions {
            let referenced = match action {
                Action::EmitEvent { event, .. } | Action::UnlockBehavior { event } => Some(event),
                _ => None,
            };
            if let Some(event) = referenced {
                if !event_ids.contains(event) {
                    errors.push(ContentError::UnknownActionEvent {
                        context: context.clone(),
                        event: event.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::TriggerKind;

    fn minimal_registry() -> ContentRegistry {
        ContentRegistry::new()
            .with_node(NodeSeed::new("area.gate", NodeType::Area, "The Gate"))
            .with_node(NodeSeed::new("npc.guard", NodeType::Npc, "Gate Guard"))
            .with_edge(EdgeSpec::new("area.gate", "npc.guard", EdgeType::Contains))
            .with_event(EventSpec::new("ev.alarm", "area.gate"))
    }

    #[test]
    fn test_valid_registry_passes() {
        assert!(minimal_registry().validate().is_ok());
    }

    #[test]
    fn test_dangling_edge_is_fatal() {
        let registry = minimal_registry()
            .with_edge(EdgeSpec::new("area.gate", "npc.ghost", EdgeType::Contains));

        let errors = registry.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ContentError::DanglingEdge { missing, .. } if missing.as_str() == "npc.ghost")));
    }

    #[test]
    fn test_duplicate_ids_are_fatal() {
        let registry =
            minimal_registry().with_node(NodeSeed::new("npc.guard", NodeType::Npc, "Impostor"));

        let errors = registry.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ContentError::DuplicateNode(id) if id.as_str() == "npc.guard")));
    }

    #[test]
    fn test_behavior_owner_must_exist() {
        let registry = minimal_registry().with_behavior(Behavior::new(
            "bhv.haunt",
            "npc.ghost",
            TriggerKind::OnTick,
        ));

        let errors = registry.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ContentError::UnknownBehaviorOwner { .. })));
    }

    #[test]
    fn test_event_area_must_be_an_area() {
        let registry = minimal_registry().with_event(EventSpec::new("ev.stray", "npc.guard"));

        let errors = registry.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ContentError::InvalidEventArea { event, .. } if event.as_str() == "ev.stray")));
    }

    #[test]
    fn test_actions_must_reference_known_events() {
        let registry = minimal_registry().with_behavior(
            Behavior::new("bhv.alarm", "npc.guard", TriggerKind::OnTick).with_action(
                Action::EmitEvent {
                    event: "ev.unknown".into(),
                    origin: "npc.guard".into(),
                    scope: Default::default(),
                    strength: 1.0,
                },
            ),
        );

        let errors = registry.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ContentError::UnknownActionEvent { event, .. } if event.as_str() == "ev.unknown")));
    }

    #[test]
    fn test_toml_round_trip() {
        let registry = minimal_registry();
        let toml = registry.to_toml_string().unwrap();
        let back = ContentRegistry::from_toml_str(&toml).unwrap();
        assert_eq!(back, registry);
    }

    #[test]
    fn test_toml_authoring_format() {
        let content = r#"
            [[nodes]]
            id = "area.fen"
            node_type = "area"
            name = "The Blackfen"

            [[nodes]]
            id = "player"
            node_type = "player"
            name = "Player"
            [nodes.state]
            level = 1
            hp = 20

            [[events]]
            id = "ev.lights"
            area_id = "area.fen"
            cooldown_rounds = 3
            is_repeatable = true

            [events.trigger_conditions]
            [events.trigger_conditions.leaf]
            kind = "state_above"
            node = "player"
            key = "level"
            threshold = 2
        "#;

        let registry = ContentRegistry::from_toml_str(content).unwrap();
        assert_eq!(registry.nodes.len(), 2);
        assert_eq!(registry.events.len(), 1);
        assert!(registry.events[0].is_repeatable);
        assert!(registry.validate().is_ok());
    }
}
