//! Point-in-time projection of tick data onto the layout graph.
//!
//! [`SnapshotReconciler::reconcile`] turns the static [`LayoutGraph`] plus the
//! tick store's view of one tick into renderer-ready [`VisualNode`]s and
//! [`VisualEdge`]s. Each call runs five passes:
//!
//! 1. **Remembered state**: one `last_display_state` lookup per host and per
//!    decorator row, at or before the viewed tick.
//! 2. **Activity edges**: an edge is on the activity path when every path
//!    position its source host represents comes strictly before every path
//!    position its target host represents.
//! 3. **Synthetic state**: utility composites report their children's scores
//!    as one ordered list on themselves; score `i` is projected as
//!    `{"lastScore": s}` onto the utility decorator wrapping child `i`.
//! 4. **Projection**: result, display state (snapshot, then remembered, then
//!    synthetic), staleness, selection, activity flags and ref events for
//!    every host and decorator row.
//! 5. **Diff**: each row is compared field by field (display state deeply)
//!    with the previous call's output; an unchanged node or edge is returned
//!    as the *same* `Arc`, so renderers can skip it with `Arc::ptr_eq`.
//!
//! The previous-output maps are private to the reconciler and replaced
//! wholesale on every call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use canopy_trace::flags::NodeFlags;
use canopy_trace::state::{DisplayState, SCORES_KEY};
use canopy_trace::store::{RememberedState, TickSnapshot, TickStore};
use canopy_trace::tick::{NodeResult, RefEvent, Tick, TickId};
use canopy_trace::tree::NodeId;
use serde::Serialize;
use tracing::trace;

use crate::layout::{DecoratorSlot, LayoutEdge, LayoutGraph, LayoutNode, Position};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Everything one reconciliation depends on besides the tick store.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub layout: &'a LayoutGraph,
    /// `None` when nothing is being viewed (no ticks yet).
    pub viewed_tick_id: Option<TickId>,
    /// The store's snapshot of the viewed tick.
    pub snapshot: Option<&'a TickSnapshot>,
    pub selected_node_id: Option<NodeId>,
    /// Root-first node ids of the highlighted activity branch. May be empty.
    pub activity_path: &'a [NodeId],
    pub activity_tail: Option<NodeId>,
    /// Ref mutations of the viewed tick, grouped by writing node.
    pub ref_events: &'a HashMap<NodeId, Vec<RefEvent>>,
}

/// Group a tick's ref events by the node that wrote them. Events without a
/// node are not attributable to any row and are dropped.
pub fn ref_events_by_node(tick: &Tick) -> HashMap<NodeId, Vec<RefEvent>> {
    let mut grouped: HashMap<NodeId, Vec<RefEvent>> = HashMap::new();
    for event in &tick.ref_events {
        if let Some(node_id) = event.node_id {
            grouped.entry(node_id).or_default().push(event.clone());
        }
    }
    grouped
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Per-tick annotations shared by host nodes and decorator rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NodeView {
    pub result: Option<NodeResult>,
    pub display_state: Option<DisplayState>,
    /// The display state did not come from the viewed tick itself.
    pub display_state_is_stale: bool,
    pub is_selected: bool,
    pub is_on_activity_path: bool,
    pub is_activity_tail: bool,
    pub ref_events: Vec<RefEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoratorRow {
    pub node_id: NodeId,
    pub name: String,
    pub flags: NodeFlags,
    pub view: NodeView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualNode {
    pub host_id: NodeId,
    pub name: String,
    pub flags: NodeFlags,
    pub position: Position,
    pub represented_node_ids: Vec<NodeId>,
    pub view: NodeView,
    pub stacked_decorators: Vec<DecoratorRow>,
    pub lifecycle_decorators: Vec<DecoratorRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualEdge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub is_on_activity_path: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub nodes_reused: usize,
    pub nodes_rebuilt: usize,
    pub edges_reused: usize,
    pub edges_rebuilt: usize,
}

/// Renderer-facing graph in layout order.
#[derive(Debug, Clone, Default)]
pub struct ReconciledGraph {
    pub nodes: Vec<Arc<VisualNode>>,
    pub edges: Vec<Arc<VisualEdge>>,
    pub stats: ReconcileStats,
}

impl ReconciledGraph {
    pub fn node(&self, host_id: NodeId) -> Option<&Arc<VisualNode>> {
        self.nodes.iter().find(|n| n.host_id == host_id)
    }

    pub fn edge(&self, id: &str) -> Option<&Arc<VisualEdge>> {
        self.edges.iter().find(|e| e.id == id)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

struct SyntheticState {
    state: DisplayState,
    stale: bool,
}

/// A row's annotations borrowed from the inputs, compared against the
/// previous output before anything is allocated.
struct ResolvedRow<'a> {
    result: Option<NodeResult>,
    display_state: Option<&'a DisplayState>,
    stale: bool,
    selected: bool,
    on_path: bool,
    tail: bool,
    ref_events: &'a [RefEvent],
}

impl ResolvedRow<'_> {
    fn matches(&self, view: &NodeView) -> bool {
        view.ref_events.len() == self.ref_events.len()
            && view.result == self.result
            && view.display_state_is_stale == self.stale
            && view.is_selected == self.selected
            && view.is_on_activity_path == self.on_path
            && view.is_activity_tail == self.tail
            && view.display_state.as_ref() == self.display_state
            && view.ref_events.as_slice() == self.ref_events
    }

    fn to_view(&self) -> NodeView {
        NodeView {
            result: self.result,
            display_state: self.display_state.cloned(),
            display_state_is_stale: self.stale,
            is_selected: self.selected,
            is_on_activity_path: self.on_path,
            is_activity_tail: self.tail,
            ref_events: self.ref_events.to_vec(),
        }
    }
}

struct Resolver<'a> {
    input: &'a ReconcileInput<'a>,
    remembered: &'a HashMap<NodeId, RememberedState>,
    synthetic: &'a HashMap<NodeId, SyntheticState>,
    path_set: HashSet<NodeId>,
}

impl<'a> Resolver<'a> {
    fn display_state(&self, node_id: NodeId) -> (Option<&'a DisplayState>, bool) {
        let exact = self
            .input
            .snapshot
            .and_then(|s| s.get(node_id))
            .and_then(|n| n.state.as_ref());
        if let Some(state) = exact {
            return (Some(state), false);
        }
        if let Some(remembered) = self.remembered.get(&node_id) {
            return (Some(&remembered.state), true);
        }
        if let Some(synthetic) = self.synthetic.get(&node_id) {
            return (Some(&synthetic.state), synthetic.stale);
        }
        (None, false)
    }

    /// Resolve one row. `matched_ids` are the ids selection and activity are
    /// matched against: every represented id for a host, the row's own id
    /// for a decorator.
    fn row(&self, node_id: NodeId, matched_ids: &[NodeId]) -> ResolvedRow<'a> {
        let (display_state, stale) = self.display_state(node_id);
        ResolvedRow {
            result: self
                .input
                .snapshot
                .and_then(|s| s.get(node_id))
                .map(|n| n.result),
            display_state,
            stale,
            selected: self
                .input
                .selected_node_id
                .is_some_and(|s| matched_ids.contains(&s)),
            on_path: matched_ids.iter().any(|id| self.path_set.contains(id)),
            tail: self
                .input
                .activity_tail
                .is_some_and(|t| matched_ids.contains(&t)),
            ref_events: self
                .input
                .ref_events
                .get(&node_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        }
    }
}

/// Pass 1.
fn remembered_states<S: TickStore>(
    store: &S,
    input: &ReconcileInput<'_>,
) -> HashMap<NodeId, RememberedState> {
    let mut remembered = HashMap::new();
    let Some(viewed) = input.viewed_tick_id else {
        return remembered;
    };
    for node in input.layout.nodes() {
        for &id in &node.represented_node_ids {
            if let Some(state) = store.last_display_state(id, Some(viewed)) {
                remembered.insert(id, state);
            }
        }
    }
    remembered
}

/// Pass 2 helper: node id -> first position in the activity path. Empty for
/// paths of length 0 or 1, which highlight no edge.
fn path_positions(path: &[NodeId]) -> HashMap<NodeId, usize> {
    let mut positions = HashMap::new();
    if path.len() > 1 {
        for (i, &id) in path.iter().enumerate() {
            positions.entry(id).or_insert(i);
        }
    }
    positions
}

fn edge_on_path(layout: &LayoutGraph, edge: &LayoutEdge, positions: &HashMap<NodeId, usize>) -> bool {
    if positions.is_empty() {
        return false;
    }
    let (Some(source), Some(target)) = (layout.node(edge.source), layout.node(edge.target)) else {
        return false;
    };
    let source_last = source
        .represented_node_ids
        .iter()
        .filter_map(|id| positions.get(id))
        .max();
    let target_first = target
        .represented_node_ids
        .iter()
        .filter_map(|id| positions.get(id))
        .min();
    matches!((source_last, target_first), (Some(s), Some(t)) if s < t)
}

/// Pass 3.
fn synthetic_states(
    input: &ReconcileInput<'_>,
    remembered: &HashMap<NodeId, RememberedState>,
) -> HashMap<NodeId, SyntheticState> {
    let mut synthetic = HashMap::new();
    let layout = input.layout;

    for parent in layout.nodes().iter().filter(|n| n.flags.is_utility_composite()) {
        let exact = input
            .snapshot
            .and_then(|s| s.get(parent.host_id))
            .and_then(|n| n.state.as_ref());
        let (state, stale) = match (exact, remembered.get(&parent.host_id)) {
            (Some(state), _) => (state, false),
            (None, Some(r)) => (&r.state, true),
            (None, None) => continue,
        };
        let Some(scores) = state.score_list(SCORES_KEY) else {
            continue;
        };

        for (index, child_host) in parent.child_host_ids.iter().enumerate() {
            let Some(&score) = scores.get(index) else {
                break;
            };
            let Some(child) = layout.node(*child_host) else {
                continue;
            };
            let target = child
                .decorators()
                .find(|d| d.flags.is_utility_decorator())
                .map(|d| d.node_id)
                .or_else(|| child.flags.is_utility_decorator().then_some(child.host_id));
            if let Some(node_id) = target {
                synthetic.insert(
                    node_id,
                    SyntheticState {
                        state: DisplayState::last_score(score),
                        stale,
                    },
                );
            }
        }
    }
    synthetic
}

// ---------------------------------------------------------------------------
// Diff helpers
// ---------------------------------------------------------------------------

fn rows_unchanged(previous: &[DecoratorRow], slots: &[DecoratorSlot], resolved: &[ResolvedRow<'_>]) -> bool {
    previous.len() == slots.len()
        && previous
            .iter()
            .zip(slots)
            .zip(resolved)
            .all(|((prev, slot), row)| {
                prev.node_id == slot.node_id
                    && prev.flags == slot.flags
                    && prev.name == slot.name
                    && row.matches(&prev.view)
            })
}

fn node_unchanged(
    previous: &VisualNode,
    layout: &LayoutNode,
    host: &ResolvedRow<'_>,
    stacked: &[ResolvedRow<'_>],
    lifecycle: &[ResolvedRow<'_>],
) -> bool {
    previous.host_id == layout.host_id
        && previous.flags == layout.flags
        && previous.position == layout.position
        && previous.represented_node_ids == layout.represented_node_ids
        && previous.name == layout.name
        && host.matches(&previous.view)
        && rows_unchanged(&previous.stacked_decorators, &layout.stacked_decorators, stacked)
        && rows_unchanged(
            &previous.lifecycle_decorators,
            &layout.lifecycle_decorators,
            lifecycle,
        )
}

fn build_rows(slots: &[DecoratorSlot], resolved: &[ResolvedRow<'_>]) -> Vec<DecoratorRow> {
    slots
        .iter()
        .zip(resolved)
        .map(|(slot, row)| DecoratorRow {
            node_id: slot.node_id,
            name: slot.name.clone(),
            flags: slot.flags,
            view: row.to_view(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// SnapshotReconciler
// ---------------------------------------------------------------------------

/// Owns the previous output and produces the next one.
#[derive(Debug, Default)]
pub struct SnapshotReconciler {
    previous_nodes: HashMap<NodeId, Arc<VisualNode>>,
    previous_edges: HashMap<String, Arc<VisualEdge>>,
}

impl SnapshotReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the memo so the next call rebuilds every element.
    pub fn forget(&mut self) {
        self.previous_nodes.clear();
        self.previous_edges.clear();
    }

    pub fn reconcile<S: TickStore>(&mut self, store: &S, input: &ReconcileInput<'_>) -> ReconciledGraph {
        let layout = input.layout;
        let remembered = remembered_states(store, input);
        let positions = path_positions(input.activity_path);
        let synthetic = synthetic_states(input, &remembered);
        let resolver = Resolver {
            input,
            remembered: &remembered,
            synthetic: &synthetic,
            path_set: input.activity_path.iter().copied().collect(),
        };

        let mut stats = ReconcileStats::default();

        let mut nodes = Vec::with_capacity(layout.nodes().len());
        let mut next_nodes = HashMap::with_capacity(layout.nodes().len());
        for layout_node in layout.nodes() {
            let host = resolver.row(layout_node.host_id, &layout_node.represented_node_ids);
            let stacked: Vec<_> = layout_node
                .stacked_decorators
                .iter()
                .map(|d| resolver.row(d.node_id, &[d.node_id]))
                .collect();
            let lifecycle: Vec<_> = layout_node
                .lifecycle_decorators
                .iter()
                .map(|d| resolver.row(d.node_id, &[d.node_id]))
                .collect();

            let node = match self.previous_nodes.get(&layout_node.host_id) {
                Some(prev) if node_unchanged(prev, layout_node, &host, &stacked, &lifecycle) => {
                    stats.nodes_reused += 1;
                    Arc::clone(prev)
                }
                _ => {
                    stats.nodes_rebuilt += 1;
                    Arc::new(VisualNode {
                        host_id: layout_node.host_id,
                        name: layout_node.name.clone(),
                        flags: layout_node.flags,
                        position: layout_node.position,
                        represented_node_ids: layout_node.represented_node_ids.clone(),
                        view: host.to_view(),
                        stacked_decorators: build_rows(&layout_node.stacked_decorators, &stacked),
                        lifecycle_decorators: build_rows(
                            &layout_node.lifecycle_decorators,
                            &lifecycle,
                        ),
                    })
                }
            };
            next_nodes.insert(layout_node.host_id, Arc::clone(&node));
            nodes.push(node);
        }

        let mut edges = Vec::with_capacity(layout.edges().len());
        let mut next_edges = HashMap::with_capacity(layout.edges().len());
        for layout_edge in layout.edges() {
            let on_path = edge_on_path(layout, layout_edge, &positions);
            let edge = match self.previous_edges.get(&layout_edge.id) {
                Some(prev)
                    if prev.source == layout_edge.source
                        && prev.target == layout_edge.target
                        && prev.is_on_activity_path == on_path =>
                {
                    stats.edges_reused += 1;
                    Arc::clone(prev)
                }
                _ => {
                    stats.edges_rebuilt += 1;
                    Arc::new(VisualEdge {
                        id: layout_edge.id.clone(),
                        source: layout_edge.source,
                        target: layout_edge.target,
                        is_on_activity_path: on_path,
                    })
                }
            };
            next_edges.insert(layout_edge.id.clone(), Arc::clone(&edge));
            edges.push(edge);
        }

        self.previous_nodes = next_nodes;
        self.previous_edges = next_edges;

        trace!(
            viewed = ?input.viewed_tick_id,
            nodes_reused = stats.nodes_reused,
            nodes_rebuilt = stats.nodes_rebuilt,
            edges_reused = stats.edges_reused,
            edges_rebuilt = stats.edges_rebuilt,
            "reconciled snapshot"
        );

        ReconciledGraph { nodes, edges, stats }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
