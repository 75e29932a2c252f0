//! Graph construction: static content registry + per-session dynamic state
//! in, a populated sealed graph out.
//!
//! Every data error here is fatal. A session that cannot build its graph
//! does not start; nothing in this module is retried or tolerated.

use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use world_model::{
    Behavior, ContentError, ContentRegistry, EdgeSpec, EdgeType, EventId, EventSpec, NodeId,
    StateValue, WorldEvent,
};

use super::{GraphError, WorldGraph};

/// Construction failures. Surfaced to the caller, which typically refuses to
/// start the session.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("content validation failed with {} problem(s)", .0.len())]
    InvalidContent(Vec<ContentError>),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("player node `{0}` is missing from content")]
    UnknownPlayer(NodeId),

    #[error("starting location `{0}` is missing from content")]
    UnknownStartLocation(NodeId),

    #[error("state override references unknown node `{0}`")]
    UnknownOverrideNode(NodeId),
}

/// Per-session dynamic state read once at build time.
///
/// After sealing, session state flows only through action execution; the
/// seed is never consulted again.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub session_id: Uuid,
    pub player: NodeId,

    /// Where the player starts (or resumes); a containment edge from this
    /// scope to the player is ensured at build time.
    pub start_location: Option<NodeId>,

    /// The round the session starts (or resumes) at.
    pub starting_round: u64,

    /// Per-node initial state overrides, e.g. carried over from a previous
    /// chapter.
    pub state_overrides: HashMap<NodeId, HashMap<String, StateValue>>,
}

impl SessionSeed {
    /// A fresh session for the given player node.
    pub fn new(player: impl Into<NodeId>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            player: player.into(),
            start_location: None,
            starting_round: 0,
            state_overrides: HashMap::new(),
        }
    }

    /// Set the starting location.
    pub fn starting_at(mut self, location: impl Into<NodeId>) -> Self {
        self.start_location = Some(location.into());
        self
    }

    /// Set the starting round.
    pub fn at_round(mut self, round: u64) -> Self {
        self.starting_round = round;
        self
    }

    /// Add a state override for a node.
    pub fn with_override(
        mut self,
        node: impl Into<NodeId>,
        key: impl Into<String>,
        value: impl Into<StateValue>,
    ) -> Self {
        self.state_overrides
            .entry(node.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// Everything the behavior engine needs to run a session.
#[derive(Debug)]
pub struct BuiltWorld {
    pub graph: WorldGraph,
    pub events: HashMap<EventId, WorldEvent>,
    pub specs: HashMap<EventId, EventSpec>,
    pub behaviors: Vec<Behavior>,
    pub session_id: Uuid,
    pub starting_round: u64,
}

/// Turns a validated content registry plus session seed into a sealed graph.
#[derive(Debug)]
pub struct GraphBuilder {
    registry: ContentRegistry,
}

impl GraphBuilder {
    /// Wrap a content registry for building.
    pub fn new(registry: ContentRegistry) -> Self {
        Self { registry }
    }

    /// Build and seal the world graph for one session.
    pub fn build(self, seed: &SessionSeed) -> Result<BuiltWorld, BuildError> {
        self.registry
            .validate()
            .map_err(BuildError::InvalidContent)?;

        let mut graph = WorldGraph::new();
        for node in &self.registry.nodes {
            graph.add_node(node.clone())?;
        }
        for edge in &self.registry.edges {
            graph.add_edge(edge.clone())?;
        }

        if !graph.contains_node(&seed.player) {
            return Err(BuildError::UnknownPlayer(seed.player.clone()));
        }

        // Place the player before sealing so placement is structure, not a
        // runtime delta.
        if let Some(location) = &seed.start_location {
            if !graph.contains_node(location) {
                return Err(BuildError::UnknownStartLocation(location.clone()));
            }
            if graph
                .edge_between(location, &seed.player, EdgeType::Contains)
                .is_none()
            {
                graph.add_edge(EdgeSpec::new(
                    location.clone(),
                    seed.player.clone(),
                    EdgeType::Contains,
                ))?;
            }
        }

        for (node, overrides) in &seed.state_overrides {
            if !graph.contains_node(node) {
                return Err(BuildError::UnknownOverrideNode(node.clone()));
            }
            for (key, value) in overrides {
                graph.set_state(node, key, value.clone())?;
            }
        }

        graph.seal();

        let mut events = HashMap::new();
        let mut specs = HashMap::new();
        for spec in &self.registry.events {
            events.insert(spec.id.clone(), WorldEvent::new(spec.id.clone()));
            specs.insert(spec.id.clone(), spec.clone());
        }

        Ok(BuiltWorld {
            graph,
            events,
            specs,
            behaviors: self.registry.behaviors.clone(),
            session_id: seed.session_id,
            starting_round: seed.starting_round,
        })
    }
}
