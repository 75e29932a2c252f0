//! End-to-end lifecycle tests: a small authored world driven through the
//! engine's public surface, including persistence round-trips.

use std::cell::RefCell;
use std::rc::Rc;

use activity_graph::{
    BehaviorEngine, GraphBuilder, RecordingRewardSink, SessionSeed, TickContext, WorldSnapshot,
};
use world_model::{
    Action, Condition, ConditionGroup, ContentRegistry, EdgeSpec, EdgeType, EngineConfig,
    EventSpec, EventStatus, NodeSeed, NodeType, RewardSpec, StateValue,
};

type SharedSink = Rc<RefCell<RecordingRewardSink>>;

fn fen_registry() -> ContentRegistry {
    ContentRegistry::new()
        .with_node(NodeSeed::new("area.fen", NodeType::Area, "The Blackfen"))
        .with_node(NodeSeed::new("loc.hut", NodeType::Location, "Reed Hut"))
        .with_node(NodeSeed::new("player", NodeType::Player, "Player").with_state("level", 1i64))
        .with_node(
            NodeSeed::new("npc.goblin", NodeType::Npc, "Marsh Goblin")
                .with_state("hp", 6i64)
                .with_cap("hp", 6),
        )
        .with_edge(EdgeSpec::new("area.fen", "loc.hut", EdgeType::Contains))
        .with_edge(EdgeSpec::new("loc.hut", "npc.goblin", EdgeType::Contains))
        .with_event(
            EventSpec::new("ev.lights", "area.fen")
                .with_trigger(ConditionGroup::leaf(Condition::StateAbove {
                    node: "player".into(),
                    key: "level".into(),
                    threshold: StateValue::Int(2),
                }))
                .with_completion(ConditionGroup::leaf(Condition::FlagSet {
                    node: "player".into(),
                    flag: "goblin_defeated".into(),
                }))
                .with_on_complete(Action::GrantReward {
                    recipient: "player".into(),
                    reward: RewardSpec::xp(50).with_item("marsh_charm", 1),
                })
                .with_on_complete(Action::UnlockBehavior {
                    event: "ev.deeper".into(),
                })
                .with_hint("The fen lights gutter and die."),
        )
        .with_event(
            EventSpec::new("ev.deeper", "area.fen").with_trigger(ConditionGroup::leaf(
                // Armed only through the unlock action above.
                Condition::FlagSet {
                    node: "player".into(),
                    flag: "never_set".into(),
                },
            )),
        )
}

fn build_engine(registry: ContentRegistry, seed: &SessionSeed, sink: SharedSink) -> BehaviorEngine {
    let built = GraphBuilder::new(registry).build(seed).unwrap();
    BehaviorEngine::new(built, EngineConfig::default(), Box::new(sink))
}

fn shared_sink() -> SharedSink {
    Rc::new(RefCell::new(RecordingRewardSink::default()))
}

fn set_player(engine: &mut BehaviorEngine, key: &str, value: StateValue) {
    let result = engine.apply_actions(&[Action::SetState {
        node: "player".into(),
        key: key.into(),
        value,
    }]);
    assert!(result.action_failures.is_empty());
}

#[test]
fn locked_event_walks_the_whole_lifecycle() {
    let sink = shared_sink();
    let seed = SessionSeed::new("player").starting_at("loc.hut");
    let mut engine = build_engine(fen_registry(), &seed, sink.clone());

    // Level 1: stays locked.
    engine.tick(TickContext::at_round(1));
    assert_eq!(
        engine.event_status(&"ev.lights".into()),
        Some(EventStatus::Locked)
    );

    // Level 3: the next tick arms it.
    set_player(&mut engine, "level", StateValue::Int(3));
    engine.tick(TickContext::at_round(2));
    assert_eq!(
        engine.event_status(&"ev.lights".into()),
        Some(EventStatus::Available)
    );

    // Entering the area activates it.
    engine.handle_enter(&"area.fen".into());
    assert_eq!(
        engine.event_status(&"ev.lights".into()),
        Some(EventStatus::Active)
    );

    // The goblin falls: completion, reward, unlock -- all in one tick.
    set_player(&mut engine, "goblin_defeated", StateValue::Bool(true));
    let result = engine.tick(TickContext::at_round(3));

    assert_eq!(
        engine.event_status(&"ev.lights".into()),
        Some(EventStatus::Completed)
    );
    assert_eq!(
        engine.event_status(&"ev.deeper".into()),
        Some(EventStatus::Available)
    );
    assert!(result
        .narrative_hints
        .iter()
        .any(|hint| hint.contains("gutter")));

    // Reward granted exactly once: one xp grant, one item grant.
    assert_eq!(sink.borrow().grants.len(), 2);

    // Re-ticking changes nothing further.
    let quiet = engine.tick(TickContext::at_round(4));
    assert!(quiet.event_transitions.is_empty());
    assert_eq!(sink.borrow().grants.len(), 2);
}

#[test]
fn snapshot_round_trip_restores_state_and_events() {
    let sink = shared_sink();
    let seed = SessionSeed::new("player").starting_at("loc.hut");
    let mut engine = build_engine(fen_registry(), &seed, sink.clone());

    // Play: complete the event, wound the goblin, spawn a stray wisp.
    set_player(&mut engine, "level", StateValue::Int(3));
    engine.tick(TickContext::at_round(1));
    engine.handle_enter(&"area.fen".into());
    set_player(&mut engine, "goblin_defeated", StateValue::Bool(true));
    engine.tick(TickContext::at_round(2));
    engine.apply_actions(&[
        Action::AdjustState {
            node: "npc.goblin".into(),
            key: "hp".into(),
            delta: -4,
        },
        Action::SpawnNode {
            seed: NodeSeed::new("npc.wisp", NodeType::Npc, "Pale Wisp").with_state("hp", 2i64),
            at: "loc.hut".into(),
        },
    ]);

    // Persist through the stable external shape.
    let snapshot = engine.capture_snapshot();
    let value = snapshot.to_json_value();
    let reloaded = WorldSnapshot::from_json_value(&value);

    // Resume: a freshly built graph of the same session, plus the delta.
    let resumed_sink = shared_sink();
    let mut resumed = build_engine(fen_registry(), &seed, resumed_sink.clone());
    resumed.restore_snapshot(&reloaded);

    // Node state matches the pre-capture graph.
    for node in engine.graph().nodes() {
        let restored = resumed
            .graph()
            .get_node(&node.id)
            .unwrap_or_else(|| panic!("node `{}` missing after restore", node.id));
        assert_eq!(restored.state, node.state, "state mismatch on `{}`", node.id);
    }
    assert!(resumed.graph().get_node(&"npc.wisp".into()).is_some());

    // Event table matches.
    for (id, instance) in engine.events() {
        let restored = resumed.events().get(id).unwrap();
        assert_eq!(restored.status, instance.status);
        assert_eq!(restored.completions, instance.completions);
        assert_eq!(restored.completed_at, instance.completed_at);
    }

    // Forced re-evaluation after restore must not re-apply side effects.
    set_player(&mut resumed, "goblin_defeated", StateValue::Bool(true));
    resumed.tick(TickContext::at_round(3));
    assert!(resumed_sink.borrow().grants.is_empty());
}

#[test]
fn restored_snapshot_survives_removed_nodes() {
    let sink = shared_sink();
    let seed = SessionSeed::new("player");
    let mut engine = build_engine(fen_registry(), &seed, sink);

    engine.apply_actions(&[Action::RemoveNode {
        node: "npc.goblin".into(),
    }]);
    assert!(engine.graph().get_node(&"npc.goblin".into()).is_none());

    let snapshot = engine.capture_snapshot();
    let mut resumed = build_engine(fen_registry(), &seed, shared_sink());
    resumed.restore_snapshot(&snapshot);

    assert!(resumed.graph().get_node(&"npc.goblin".into()).is_none());
    // The hut lost its occupant edge too.
    assert!(resumed
        .graph()
        .edge_between(&"loc.hut".into(), &"npc.goblin".into(), EdgeType::Contains)
        .is_none());
}

#[test]
fn corrupted_snapshot_resumes_with_defaults() {
    let seed = SessionSeed::new("player");
    let mut engine = build_engine(fen_registry(), &seed, shared_sink());

    // A partially written record: statuses garbled, dedup set missing.
    let reloaded = WorldSnapshot::from_json_value(&serde_json::json!({
        "round": 9,
        "event_status": { "ev.lights": "definitely not a status" },
    }));
    engine.restore_snapshot(&reloaded);

    // The garbled status fell back to the definition default.
    assert_eq!(
        engine.event_status(&"ev.lights".into()),
        Some(EventStatus::Locked)
    );
    assert!(engine.applied_effects().is_empty());
    assert_eq!(engine.clock().round(), 9);
}

#[test]
fn change_log_compaction_is_caller_driven() {
    let seed = SessionSeed::new("player");
    let mut engine = build_engine(fen_registry(), &seed, shared_sink());

    set_player(&mut engine, "level", StateValue::Int(3));
    let first = engine.capture_snapshot();
    assert_eq!(first.node_state_overwrites.len(), 1);

    // Capturing again without compaction sees the same delta.
    let again = engine.capture_snapshot();
    assert_eq!(
        again.node_state_overwrites,
        first.node_state_overwrites
    );

    // After the caller persists and compacts, the log starts fresh.
    if let Some(seq) = engine.graph().last_seq() {
        engine.compact_change_log(seq);
    }
    let after = engine.capture_snapshot();
    assert!(after.node_state_overwrites.is_empty());
}
