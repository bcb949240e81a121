//! Integration tests for projecting ticks onto the layout graph.

use std::collections::HashMap;
use std::sync::Arc;

use canopy_replay::prelude::*;
use serde_json::json;

// -- harness ----------------------------------------------------------------

/// Store, layout and reconciler wired the way a session wires them.
struct Harness {
    store: MemoryTickStore,
    layout: LayoutGraph,
    reconciler: SnapshotReconciler,
}

impl Harness {
    fn new(tree: BehaviorTree, ticks: &[Tick]) -> Self {
        let tree = Arc::new(tree);
        let mut store = MemoryTickStore::default();
        IngestionSynchronizer::new().sync(&mut store, Some(&tree), ticks);
        Self {
            layout: project_layout(&tree, &LayoutConfig::default()),
            store,
            reconciler: SnapshotReconciler::new(),
        }
    }

    fn view(&mut self, viewed: Option<TickId>) -> ReconciledGraph {
        self.view_with(viewed, None, &[], None)
    }

    fn view_with(
        &mut self,
        viewed: Option<TickId>,
        selected: Option<NodeId>,
        path: &[NodeId],
        tail: Option<NodeId>,
    ) -> ReconciledGraph {
        let snapshot = viewed.and_then(|id| self.store.snapshot_at_tick(id));
        let refs = viewed
            .and_then(|id| self.store.tick_range(id, id).into_iter().next())
            .map(ref_events_by_node)
            .unwrap_or_default();
        let input = ReconcileInput {
            layout: &self.layout,
            viewed_tick_id: viewed,
            snapshot: snapshot.as_ref(),
            selected_node_id: selected,
            activity_path: path,
            activity_tail: tail,
            ref_events: &refs,
        };
        self.reconciler.reconcile(&self.store, &input)
    }
}

fn state(value: serde_json::Value) -> DisplayState {
    DisplayState::from_json(&value).unwrap()
}

fn sequence_tree() -> BehaviorTree {
    TreeBuilder::new()
        .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, None)
        .node(2, "Approach", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, Some(1))
        .node(3, "MoveTo", NodeFlags::LEAF | NodeFlags::ACTION, Some(2))
        .node(4, "Wait", NodeFlags::LEAF | NodeFlags::ACTION | NodeFlags::TIME_BASED, Some(1))
        .build()
        .unwrap()
}

fn utility_tree() -> BehaviorTree {
    let utility = NodeFlags::COMPOSITE | NodeFlags::SELECTOR | NodeFlags::UTILITY;
    let scorer = NodeFlags::DECORATOR | NodeFlags::UTILITY;
    TreeBuilder::new()
        .node(1, "Choose", utility, None)
        .node(2, "ScoreEat", scorer, Some(1))
        .node(3, "Eat", NodeFlags::LEAF | NodeFlags::ACTION, Some(2))
        .node(4, "ScoreSleep", scorer, Some(1))
        .node(5, "Sleep", NodeFlags::LEAF | NodeFlags::ACTION, Some(4))
        .build()
        .unwrap()
}

// -- referential stability --------------------------------------------------

#[test]
fn identical_inputs_reuse_every_element() {
    let ticks = vec![Tick::new(1, None)
        .with_event(NodeEvent::new(1, NodeResult::Running))
        .with_event(NodeEvent::new(4, NodeResult::Running).with_state(state(json!({"left": 2}))))];
    let mut h = Harness::new(sequence_tree(), &ticks);

    let first = h.view(Some(1));
    let second = h.view(Some(1));

    assert_eq!(first.nodes.len(), second.nodes.len());
    for (a, b) in first.nodes.iter().zip(&second.nodes) {
        assert!(Arc::ptr_eq(a, b), "node {} was rebuilt", a.host_id);
    }
    for (a, b) in first.edges.iter().zip(&second.edges) {
        assert!(Arc::ptr_eq(a, b), "edge {} was rebuilt", a.id);
    }
    assert_eq!(second.stats.nodes_rebuilt, 0);
    assert_eq!(second.stats.edges_rebuilt, 0);
    assert_eq!(second.stats.nodes_reused, 4);
}

#[test]
fn only_changed_nodes_get_new_identity() {
    let ticks = vec![
        Tick::new(1, None)
            .with_event(NodeEvent::new(1, NodeResult::Running))
            .with_event(NodeEvent::new(4, NodeResult::Running)),
        Tick::new(2, None)
            .with_event(NodeEvent::new(1, NodeResult::Running))
            .with_event(NodeEvent::new(4, NodeResult::Success)),
    ];
    let mut h = Harness::new(sequence_tree(), &ticks);

    let at_one = h.view(Some(1));
    let at_two = h.view(Some(2));

    let changed = |id: NodeId| !Arc::ptr_eq(at_one.node(id).unwrap(), at_two.node(id).unwrap());
    assert!(!changed(1));
    assert!(!changed(2));
    assert!(!changed(3));
    assert!(changed(4));
    assert_eq!(at_two.node(4).unwrap().view.result, Some(NodeResult::Success));
    assert_eq!(at_two.stats.nodes_rebuilt, 1);

    // A result change touches no edge.
    assert_eq!(at_one.edges.len(), 3);
    for (a, b) in at_one.edges.iter().zip(&at_two.edges) {
        assert!(Arc::ptr_eq(a, b), "edge {} was rebuilt", a.id);
    }
    assert_eq!(at_two.stats.edges_rebuilt, 0);
    assert_eq!(at_two.stats.edges_reused, 3);
}

#[test]
fn extending_activity_path_rebuilds_only_new_edges() {
    let mut h = Harness::new(sequence_tree(), &[Tick::new(1, None)]);
    let short = h.view_with(Some(1), None, &[1, 2], Some(2));
    let long = h.view_with(Some(1), None, &[1, 2, 3], Some(3));

    let edge_changed = |id: &str| !Arc::ptr_eq(short.edge(id).unwrap(), long.edge(id).unwrap());
    assert!(!edge_changed("1->2"));
    assert!(!edge_changed("1->4"));
    assert!(edge_changed("2->3"));
    assert!(long.edge("2->3").unwrap().is_on_activity_path);
    assert!(long.edge("1->2").unwrap().is_on_activity_path);
    assert!(!long.edge("1->4").unwrap().is_on_activity_path);
    assert_eq!(long.stats.edges_rebuilt, 1);
    assert_eq!(long.stats.edges_reused, 2);
}

#[test]
fn deeply_equal_state_keeps_identity() {
    // A fresh but equal display state at a new tick is not a change.
    let same = || state(json!({"target": "door", "tries": 1}));
    let ticks = vec![
        Tick::new(1, None).with_event(NodeEvent::new(3, NodeResult::Running).with_state(same())),
        Tick::new(2, None).with_event(NodeEvent::new(3, NodeResult::Running).with_state(same())),
    ];
    let mut h = Harness::new(sequence_tree(), &ticks);
    let a = h.view(Some(1));
    let b = h.view(Some(2));
    assert!(Arc::ptr_eq(a.node(3).unwrap(), b.node(3).unwrap()));
}

#[test]
fn selection_change_rebuilds_only_affected_nodes() {
    let mut h = Harness::new(sequence_tree(), &[Tick::new(1, None)]);
    let before = h.view_with(Some(1), Some(3), &[], None);
    let after = h.view_with(Some(1), Some(4), &[], None);

    assert!(Arc::ptr_eq(before.node(1).unwrap(), after.node(1).unwrap()));
    assert!(!Arc::ptr_eq(before.node(3).unwrap(), after.node(3).unwrap()));
    assert!(!Arc::ptr_eq(before.node(4).unwrap(), after.node(4).unwrap()));
    assert!(after.node(4).unwrap().view.is_selected);
    assert!(!after.node(3).unwrap().view.is_selected);
}

// -- staleness --------------------------------------------------------------

#[test]
fn remembered_state_is_flagged_stale() {
    let ticks = vec![
        Tick::new(5, None).with_event(
            NodeEvent::new(4, NodeResult::Running).with_state(state(json!({"remaining": 0.5}))),
        ),
        Tick::new(6, None).with_event(NodeEvent::new(1, NodeResult::Running)),
    ];
    let mut h = Harness::new(sequence_tree(), &ticks);

    let at_five = h.view(Some(5));
    let wait = &at_five.node(4).unwrap().view;
    assert_eq!(wait.display_state, Some(state(json!({"remaining": 0.5}))));
    assert!(!wait.display_state_is_stale);
    assert_eq!(wait.result, Some(NodeResult::Running));

    let at_six = h.view(Some(6));
    let wait = &at_six.node(4).unwrap().view;
    assert_eq!(wait.display_state, Some(state(json!({"remaining": 0.5}))));
    assert!(wait.display_state_is_stale);
    // Absent from the snapshot: no result, but not treated as idle.
    assert_eq!(wait.result, None);
}

#[test]
fn node_without_history_shows_nothing() {
    let ticks = vec![Tick::new(1, None).with_event(NodeEvent::new(1, NodeResult::Running))];
    let mut h = Harness::new(sequence_tree(), &ticks);
    let graph = h.view(Some(1));
    let move_to = &graph.node(3).unwrap().view;
    assert_eq!(move_to.result, None);
    assert_eq!(move_to.display_state, None);
    assert!(!move_to.display_state_is_stale);
}

#[test]
fn later_state_is_not_visible_from_earlier_tick() {
    let ticks = vec![
        Tick::new(1, None).with_event(NodeEvent::new(4, NodeResult::Running)),
        Tick::new(2, None)
            .with_event(NodeEvent::new(4, NodeResult::Running).with_state(state(json!([1.0])))),
    ];
    let mut h = Harness::new(sequence_tree(), &ticks);
    let graph = h.view(Some(1));
    assert_eq!(graph.node(4).unwrap().view.display_state, None);
}

// -- synthetic utility state -------------------------------------------------

#[test]
fn utility_scores_project_onto_decorators() {
    let ticks = vec![Tick::new(1, None)
        .with_event(NodeEvent::new(1, NodeResult::Running).with_state(state(json!([0.3, 0.9]))))
        .with_event(NodeEvent::new(4, NodeResult::Running))
        .with_event(NodeEvent::new(5, NodeResult::Running))];
    let mut h = Harness::new(utility_tree(), &ticks);
    let graph = h.view(Some(1));

    let eat = graph.node(3).unwrap();
    assert_eq!(eat.stacked_decorators[0].node_id, 2);
    let eat_score = &eat.stacked_decorators[0].view;
    assert_eq!(eat_score.display_state, Some(DisplayState::last_score(0.3)));
    assert!(!eat_score.display_state_is_stale);

    let sleep = graph.node(5).unwrap();
    let sleep_score = &sleep.stacked_decorators[0].view;
    assert_eq!(sleep_score.display_state, Some(DisplayState::last_score(0.9)));
    assert_eq!(sleep_score.result, Some(NodeResult::Running));
}

#[test]
fn named_score_field_is_supported() {
    let ticks = vec![Tick::new(1, None).with_event(
        NodeEvent::new(1, NodeResult::Running)
            .with_state(state(json!({"scores": [0.25, 0.75], "winner": 1}))),
    )];
    let mut h = Harness::new(utility_tree(), &ticks);
    let graph = h.view(Some(1));
    assert_eq!(
        graph.node(5).unwrap().stacked_decorators[0].view.display_state,
        Some(DisplayState::last_score(0.75))
    );
}

#[test]
fn direct_decorator_state_beats_synthetic() {
    let ticks = vec![Tick::new(1, None)
        .with_event(NodeEvent::new(1, NodeResult::Running).with_state(state(json!([0.3, 0.9]))))
        .with_event(
            NodeEvent::new(2, NodeResult::Success).with_state(state(json!({"lastScore": 0.31}))),
        )];
    let mut h = Harness::new(utility_tree(), &ticks);
    let graph = h.view(Some(1));
    assert_eq!(
        graph.node(3).unwrap().stacked_decorators[0].view.display_state,
        Some(DisplayState::last_score(0.31))
    );
    assert_eq!(
        graph.node(5).unwrap().stacked_decorators[0].view.display_state,
        Some(DisplayState::last_score(0.9))
    );
}

#[test]
fn synthetic_state_from_remembered_parent_is_stale() {
    let ticks = vec![
        Tick::new(1, None)
            .with_event(NodeEvent::new(1, NodeResult::Running).with_state(state(json!([0.3, 0.9])))),
        Tick::new(2, None).with_event(NodeEvent::new(1, NodeResult::Running)),
    ];
    let mut h = Harness::new(utility_tree(), &ticks);
    let graph = h.view(Some(2));
    let eat_score = &graph.node(3).unwrap().stacked_decorators[0].view;
    assert_eq!(eat_score.display_state, Some(DisplayState::last_score(0.3)));
    assert!(eat_score.display_state_is_stale);
}

#[test]
fn short_score_list_leaves_remaining_children_empty() {
    let ticks = vec![Tick::new(1, None)
        .with_event(NodeEvent::new(1, NodeResult::Running).with_state(state(json!([0.4]))))];
    let mut h = Harness::new(utility_tree(), &ticks);
    let graph = h.view(Some(1));
    assert!(graph.node(3).unwrap().stacked_decorators[0].view.display_state.is_some());
    assert!(graph.node(5).unwrap().stacked_decorators[0].view.display_state.is_none());
}

// -- activity highlighting --------------------------------------------------

#[test]
fn activity_path_highlights_descending_edges() {
    let ticks = vec![Tick::new(1, None)
        .with_event(NodeEvent::new(1, NodeResult::Running))
        .with_event(NodeEvent::new(2, NodeResult::Running))
        .with_event(NodeEvent::new(3, NodeResult::Running))];
    let mut h = Harness::new(sequence_tree(), &ticks);
    let graph = h.view_with(Some(1), None, &[1, 2, 3], Some(3));

    assert!(graph.edge("1->2").unwrap().is_on_activity_path);
    assert!(graph.edge("2->3").unwrap().is_on_activity_path);
    assert!(!graph.edge("1->4").unwrap().is_on_activity_path);

    assert!(graph.node(1).unwrap().view.is_on_activity_path);
    assert!(graph.node(3).unwrap().view.is_activity_tail);
    assert!(!graph.node(2).unwrap().view.is_activity_tail);
    assert!(!graph.node(4).unwrap().view.is_on_activity_path);
}

#[test]
fn activity_through_collapsed_decorators() {
    let ticks = vec![Tick::new(1, None)
        .with_event(NodeEvent::new(1, NodeResult::Running))
        .with_event(NodeEvent::new(4, NodeResult::Running))
        .with_event(NodeEvent::new(5, NodeResult::Running))];
    let mut h = Harness::new(utility_tree(), &ticks);
    let graph = h.view_with(Some(1), None, &[1, 4, 5], Some(5));

    assert!(graph.edge("1->5").unwrap().is_on_activity_path);
    assert!(!graph.edge("1->3").unwrap().is_on_activity_path);
    let sleep = graph.node(5).unwrap();
    assert!(sleep.stacked_decorators[0].view.is_on_activity_path);
    assert!(!sleep.stacked_decorators[0].view.is_activity_tail);
}

#[test]
fn empty_activity_is_tolerated() {
    let mut h = Harness::new(sequence_tree(), &[Tick::new(1, None)]);
    let graph = h.view_with(Some(1), None, &[], Some(99));
    assert!(graph.edges.iter().all(|e| !e.is_on_activity_path));
    assert!(graph.nodes.iter().all(|n| !n.view.is_activity_tail));
}

// -- ref events -------------------------------------------------------------

#[test]
fn ref_events_attach_to_their_writer() {
    let ticks = vec![Tick::new(1, None)
        .with_event(NodeEvent::new(3, NodeResult::Running))
        .with_ref_event(RefEvent {
            node_id: Some(3),
            ref_name: "destination".into(),
            value: json!([4, 2]),
            is_async: false,
        })
        .with_ref_event(RefEvent {
            node_id: None,
            ref_name: "external".into(),
            value: json!(null),
            is_async: true,
        })];
    let mut h = Harness::new(sequence_tree(), &ticks);
    let graph = h.view(Some(1));
    let events = &graph.node(3).unwrap().view.ref_events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ref_name, "destination");
    assert!(graph.node(1).unwrap().view.ref_events.is_empty());
}

#[test]
fn ref_events_helper_groups_by_node() {
    let tick = Tick::new(1, None)
        .with_ref_event(RefEvent {
            node_id: Some(7),
            ref_name: "a".into(),
            value: json!(1),
            is_async: false,
        })
        .with_ref_event(RefEvent {
            node_id: Some(7),
            ref_name: "b".into(),
            value: json!(2),
            is_async: false,
        });
    let grouped: HashMap<NodeId, Vec<RefEvent>> = ref_events_by_node(&tick);
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[&7].len(), 2);
}
