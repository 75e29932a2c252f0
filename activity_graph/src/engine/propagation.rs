//! Decayed breadth-first event propagation.
//!
//! An emitted event spreads outward from its origin along outgoing edges,
//! its activation score shrinking by the edge weight times the configured
//! decay at every hop. Traversal stops below the minimum score or at the
//! scope's depth bound. Nodes reached on several paths keep the highest
//! score found, never the sum.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use world_model::{NodeId, PropagationConfig, PropagationScope};

use super::executor::EmittedEvent;
use crate::graph::WorldGraph;

/// A node reached by propagation, with the activation score it retained.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationHit {
    pub node: NodeId,
    pub score: f32,
    /// Hops from the origin at which the best score was found.
    pub depth: u32,
}

/// Spread an emitted event across the graph.
///
/// Read-only over the graph: the hits are returned for the behavior engine
/// to re-evaluate, never mutated here. Results are ordered by descending
/// score (ties broken by node id) so downstream processing is deterministic.
pub fn propagate(
    event: &EmittedEvent,
    graph: &WorldGraph,
    config: &PropagationConfig,
) -> Vec<PropagationHit> {
    let mut best: HashMap<NodeId, (f32, u32)> = HashMap::new();

    if event.strength < config.min_score {
        return Vec::new();
    }
    best.insert(event.origin.clone(), (event.strength, 0));

    let max_depth = match event.scope {
        PropagationScope::Local => 0,
        PropagationScope::Area => config.scope_depth,
        PropagationScope::Global => config.global_depth,
    };

    // Decay lives in (0, 1] so scores are non-increasing with depth.
    let decay = config.default_decay.clamp(f32::EPSILON, 1.0);

    // Area-scoped spreads never leave the origin's area subgraph.
    let home_area = match event.scope {
        PropagationScope::Area => graph.containing_area(&event.origin),
        _ => None,
    };

    let mut frontier: VecDeque<(NodeId, f32, u32)> = VecDeque::new();
    frontier.push_back((event.origin.clone(), event.strength, 0));

    while let Some((current, score, depth)) = frontier.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for edge in graph.neighbors(&current, None) {
            let next_score = score * edge.decay_weight() * decay;
            if next_score < config.min_score {
                continue;
            }
            if let Some(area) = &home_area {
                if graph.containing_area(&edge.target).as_ref() != Some(area) {
                    continue;
                }
            }
            let entry = best.get(&edge.target);
            if entry.map_or(true, |(existing, _)| next_score > *existing) {
                best.insert(edge.target.clone(), (next_score, depth + 1));
                frontier.push_back((edge.target.clone(), next_score, depth + 1));
            }
        }
    }

    let mut hits: Vec<PropagationHit> = best
        .into_iter()
        .map(|(node, (score, depth))| PropagationHit { node, score, depth })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node.cmp(&b.node))
    });

    debug!(
        event = %event.event,
        origin = %event.origin,
        hits = hits.len(),
        "propagation finished"
    );
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_model::{EdgeSpec, EdgeType, EventId, NodeSeed, NodeType};

    fn emitted(origin: &str, scope: PropagationScope, strength: f32) -> EmittedEvent {
        EmittedEvent::new(EventId::new("ev.test"), origin.into(), scope, strength)
    }

    /// One area containing a hub location with two spokes of differing
    /// weight, and a second area adjacent to the hub.
    fn fixture() -> WorldGraph {
        let mut graph = WorldGraph::new();
        for (id, node_type, name) in [
            ("area.fen", NodeType::Area, "The Blackfen"),
            ("area.ridge", NodeType::Area, "The Ridge"),
            ("loc.hub", NodeType::Location, "Hub"),
            ("loc.near", NodeType::Location, "Near Spoke"),
            ("loc.far", NodeType::Location, "Far Spoke"),
        ] {
            graph.add_node(NodeSeed::new(id, node_type, name)).unwrap();
        }
        graph
            .add_edge(EdgeSpec::new("area.fen", "loc.hub", EdgeType::Contains))
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("area.fen", "loc.near", EdgeType::Contains))
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("area.fen", "loc.far", EdgeType::Contains))
            .unwrap();
        graph
            .add_edge(
                EdgeSpec::new("loc.hub", "loc.near", EdgeType::Adjacent).with_weight(1.0),
            )
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("loc.hub", "loc.far", EdgeType::Adjacent).with_weight(0.2))
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("loc.hub", "area.ridge", EdgeType::Adjacent))
            .unwrap();
        graph.seal();
        graph
    }

    fn config() -> PropagationConfig {
        PropagationConfig {
            default_decay: 0.5,
            min_score: 0.05,
            scope_depth: 2,
            global_depth: 4,
            initial_strength: 1.0,
        }
    }

    fn score_of(hits: &[PropagationHit], node: &str) -> Option<f32> {
        hits.iter()
            .find(|hit| hit.node.as_str() == node)
            .map(|hit| hit.score)
    }

    #[test]
    fn test_depth_one_decay_scores() {
        let graph = fixture();
        let hits = propagate(
            &emitted("loc.hub", PropagationScope::Area, 1.0),
            &graph,
            &config(),
        );

        // weight 1.0 edge: 1.0 * 1.0 * 0.5 = 0.5
        assert!((score_of(&hits, "loc.near").unwrap() - 0.5).abs() < 1e-6);
        // weight 0.2 edge: 1.0 * 0.2 * 0.5 = 0.1
        assert!((score_of(&hits, "loc.far").unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_below_threshold_excluded_entirely() {
        let graph = fixture();
        let mut cfg = config();
        cfg.min_score = 0.2;

        let hits = propagate(
            &emitted("loc.hub", PropagationScope::Area, 1.0),
            &graph,
            &cfg,
        );

        assert!(score_of(&hits, "loc.near").is_some());
        // 0.1 < 0.2: dropped from the result set, not merely down-ranked.
        assert!(score_of(&hits, "loc.far").is_none());
    }

    #[test]
    fn test_local_scope_confined_to_origin() {
        let graph = fixture();
        let hits = propagate(
            &emitted("loc.hub", PropagationScope::Local, 1.0),
            &graph,
            &config(),
        );

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.as_str(), "loc.hub");
        assert_eq!(hits[0].depth, 0);
    }

    #[test]
    fn test_area_scope_stays_inside_area() {
        let graph = fixture();
        let hits = propagate(
            &emitted("loc.hub", PropagationScope::Area, 1.0),
            &graph,
            &config(),
        );

        // area.ridge is reachable but outside the origin's area subgraph.
        assert!(score_of(&hits, "area.ridge").is_none());
    }

    #[test]
    fn test_global_scope_crosses_areas() {
        let graph = fixture();
        let hits = propagate(
            &emitted("loc.hub", PropagationScope::Global, 1.0),
            &graph,
            &config(),
        );

        assert!(score_of(&hits, "area.ridge").is_some());
    }

    #[test]
    fn test_multiple_paths_keep_max_not_sum() {
        let mut graph = WorldGraph::new();
        for id in ["a", "b", "c", "d"] {
            graph
                .add_node(NodeSeed::new(id, NodeType::Location, id.to_uppercase()))
                .unwrap();
        }
        // Two paths to d: a->b->d (strong) and a->c->d (weak).
        graph
            .add_edge(EdgeSpec::new("a", "b", EdgeType::Adjacent).with_weight(1.0))
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("b", "d", EdgeType::Adjacent).with_weight(1.0))
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("a", "c", EdgeType::Adjacent).with_weight(0.5))
            .unwrap();
        graph
            .add_edge(EdgeSpec::new("c", "d", EdgeType::Adjacent).with_weight(0.5))
            .unwrap();
        graph.seal();

        let mut cfg = config();
        cfg.min_score = 0.01;
        let hits = propagate(&emitted("a", PropagationScope::Global, 1.0), &graph, &cfg);

        // Strong path: 1.0 * 0.5 * 0.5 = 0.25; weak path would give 0.0625.
        assert!((score_of(&hits, "d").unwrap() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_scores_non_increasing_with_depth() {
        let graph = fixture();
        let hits = propagate(
            &emitted("loc.hub", PropagationScope::Global, 1.0),
            &graph,
            &config(),
        );

        for window in hits.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for hit in &hits {
            assert!(hit.score <= 1.0);
        }
    }
}
