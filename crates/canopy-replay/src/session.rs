//! One debugger view over one tick store.
//!
//! [`DebugSession`] sequences the pipeline for every update cycle:
//!
//! ```text
//! tree + ticks ─▶ IngestionSynchronizer ─▶ TickStore
//!                                            │
//!                 TimeTravelController ◀─────┤ (refresh)
//!                        │ viewed tick       │
//!                        ▼                   │
//!   LayoutGraph ─▶ SnapshotReconciler ◀──────┘ (snapshot, remembered state)
//!                        │
//!                        ▼
//!                  SessionFrame
//! ```
//!
//! Ingestion always finishes before time travel or reconciliation read the
//! store; the store is only ever mutated through the synchronizer.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use canopy_trace::memory::MemoryTickStore;
use canopy_trace::store::{
    ActivityMode, ActivitySnapshot, NodeSnapshot, ProfilingData, RememberedState, ResultSummary,
    StoreConfig, TickStore, TimeTravelCloneOptions,
};
use canopy_trace::tick::{Tick, TickId};
use canopy_trace::trace_file::TraceFile;
use canopy_trace::tree::{BehaviorTree, NodeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ingest::{IngestionSynchronizer, SyncOutcome};
use crate::layout::{project_layout, LayoutConfig, LayoutGraph};
use crate::perf::{PerformanceProjector, PerformanceView};
use crate::reconcile::{ref_events_by_node, ReconcileInput, ReconciledGraph, SnapshotReconciler};
use crate::time_travel::{TimeTravelConfig, TimeTravelController, TimeTravelView, ViewMode};
use crate::ReplayError;

// ---------------------------------------------------------------------------
// ReplayConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`DebugSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub store: StoreConfig,
    pub layout: LayoutConfig,
    pub time_travel: TimeTravelConfig,
    /// Which branches count as activity.
    pub activity_mode: ActivityMode,
    /// Number of entries in [`PerformanceView::hot_nodes`].
    pub hot_node_limit: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            layout: LayoutConfig::default(),
            time_travel: TimeTravelConfig::default(),
            activity_mode: ActivityMode::default(),
            hot_node_limit: 10,
        }
    }
}

impl ReplayConfig {
    /// Parse a JSON config; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ReplayError> {
        serde_json::from_str(json).map_err(ReplayError::Config)
    }
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Output of one [`DebugSession::update`].
#[derive(Debug, Clone)]
pub struct SessionFrame {
    pub generation: u64,
    pub sync: SyncOutcome,
    pub view: TimeTravelView,
    pub graph: ReconciledGraph,
    /// Activity branches of the viewed tick.
    pub activity: ActivitySnapshot,
}

/// Details panel data for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInspection {
    pub node_id: NodeId,
    pub label: String,
    /// Root-first ids of the node's ancestors and itself.
    pub path: Vec<NodeId>,
    pub at_viewed_tick: Option<NodeSnapshot>,
    pub remembered: Option<RememberedState>,
    pub summary: ResultSummary,
    pub history_len: usize,
    pub profiling: Option<ProfilingData>,
}

// ---------------------------------------------------------------------------
// DebugSession
// ---------------------------------------------------------------------------

pub struct DebugSession<S: TickStore = MemoryTickStore> {
    config: ReplayConfig,
    store: S,
    synchronizer: IngestionSynchronizer,
    controller: TimeTravelController,
    reconciler: SnapshotReconciler,
    performance: PerformanceProjector,
    /// Layout of the current tree, keyed by tree identity.
    layout: Option<(Arc<BehaviorTree>, Arc<LayoutGraph>)>,
    /// Exact-percentile copy of the store used while paused, tagged with the
    /// generation it was taken at.
    frozen_copy: Option<(u64, S)>,
    selected_node_id: Option<NodeId>,
    selected_activity_tail: Option<NodeId>,
}

impl DebugSession<MemoryTickStore> {
    pub fn new(config: ReplayConfig) -> Self {
        let store = MemoryTickStore::new(config.store.clone());
        Self::with_store(store, config)
    }
}

impl Default for DebugSession<MemoryTickStore> {
    fn default() -> Self {
        Self::new(ReplayConfig::default())
    }
}

impl<S: TickStore> DebugSession<S> {
    /// Drive an existing store. `config.store` is ignored; the store brings
    /// its own retention settings.
    pub fn with_store(store: S, config: ReplayConfig) -> Self {
        Self {
            controller: TimeTravelController::new(config.time_travel.clone()),
            performance: PerformanceProjector::new(config.hot_node_limit),
            config,
            store,
            synchronizer: IngestionSynchronizer::new(),
            reconciler: SnapshotReconciler::new(),
            layout: None,
            frozen_copy: None,
            selected_node_id: None,
            selected_activity_tail: None,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Read-only access to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn generation(&self) -> u64 {
        self.synchronizer.generation()
    }

    pub fn mode(&self) -> ViewMode {
        self.controller.mode()
    }

    pub fn viewed_tick_id(&self) -> Option<TickId> {
        self.controller.viewed_tick_id(&self.store)
    }

    pub fn layout(&self) -> Option<&Arc<LayoutGraph>> {
        self.layout.as_ref().map(|(_, graph)| graph)
    }

    pub fn selected_node_id(&self) -> Option<NodeId> {
        self.selected_node_id
    }

    pub fn selected_activity_tail(&self) -> Option<NodeId> {
        self.selected_activity_tail
    }

    // -- update cycle -------------------------------------------------------

    /// Run one full update cycle against the producer's current tree and
    /// tick sequence.
    pub fn update(&mut self, tree: Option<&Arc<BehaviorTree>>, ticks: &[Tick]) -> SessionFrame {
        let sync = self.synchronizer.sync(&mut self.store, tree, ticks);
        if sync.tree_changed {
            self.forget_trace(tree);
        }
        let view = self.controller.refresh(&self.store);
        let layout = self.layout_for(tree);
        let viewed = view.viewed_tick_id;

        let activity = match (view.mode, viewed) {
            (ViewMode::Live, _) => self.store.latest_activity(self.config.activity_mode),
            (ViewMode::Paused, Some(id)) => self.store.activity_at_tick(id, self.config.activity_mode),
            (ViewMode::Paused, None) => ActivitySnapshot::default(),
        };

        if let Some(tail) = self.selected_activity_tail {
            if activity.branch_with_tail(tail).is_none() {
                debug!(tail, "selected activity branch is gone, clearing highlight");
                self.selected_activity_tail = None;
            }
        }
        let branch = self
            .selected_activity_tail
            .and_then(|tail| activity.branch_with_tail(tail));

        let snapshot = viewed.and_then(|id| self.store.snapshot_at_tick(id));
        let ref_events = viewed
            .and_then(|id| self.store.tick_range(id, id).into_iter().next())
            .map(ref_events_by_node)
            .unwrap_or_default();

        let input = ReconcileInput {
            layout: layout.as_ref(),
            viewed_tick_id: viewed,
            snapshot: snapshot.as_ref(),
            selected_node_id: self.selected_node_id,
            activity_path: branch.map(|b| b.path_node_ids.as_slice()).unwrap_or(&[]),
            activity_tail: branch.map(|b| b.tail_node_id),
            ref_events: &ref_events,
        };
        let graph = self.reconciler.reconcile(&self.store, &input);

        SessionFrame {
            generation: self.synchronizer.generation(),
            sync,
            view,
            graph,
            activity,
        }
    }

    /// Drop every piece of view state tied to the previous trace: the
    /// paused position, the timestamp classification, the highlighted
    /// branch, the frozen performance copy, and a selection the new tree
    /// does not contain.
    fn forget_trace(&mut self, tree: Option<&Arc<BehaviorTree>>) {
        debug!(
            mode = ?self.controller.mode(),
            "tree replaced, resetting time travel and highlights"
        );
        self.controller.reset();
        self.selected_activity_tail = None;
        self.frozen_copy = None;
        let still_present = match (self.selected_node_id, tree) {
            (Some(id), Some(tree)) => tree.contains(id),
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !still_present {
            self.selected_node_id = None;
        }
    }

    /// Reset the store and re-ingest `ticks` against the current tree.
    pub fn rebuild(&mut self, ticks: &[Tick]) -> SyncOutcome {
        self.synchronizer.rebuild(&mut self.store, ticks)
    }

    fn layout_for(&mut self, tree: Option<&Arc<BehaviorTree>>) -> Arc<LayoutGraph> {
        let Some(tree) = tree else {
            self.layout = None;
            return Arc::new(LayoutGraph::default());
        };
        if let Some((cached_tree, graph)) = &self.layout {
            if Arc::ptr_eq(cached_tree, tree) {
                return Arc::clone(graph);
            }
        }
        let graph = Arc::new(project_layout(tree, &self.config.layout));
        debug!(
            nodes = tree.len(),
            hosts = graph.nodes().len(),
            "projected layout for new tree"
        );
        self.layout = Some((Arc::clone(tree), Arc::clone(&graph)));
        graph
    }

    // -- selection ----------------------------------------------------------

    /// Select a node, or clear the selection with `None`. The id must exist
    /// in the current tree when one is loaded.
    pub fn select_node(&mut self, node_id: Option<NodeId>) -> Result<(), ReplayError> {
        if let (Some(id), Some((tree, _))) = (node_id, &self.layout) {
            if !tree.contains(id) {
                return Err(ReplayError::UnknownNode { node_id: id });
            }
        }
        self.selected_node_id = node_id;
        Ok(())
    }

    /// Highlight the activity branch ending at `tail`. Cleared automatically
    /// by [`update`](Self::update) once that branch disappears.
    pub fn select_activity_tail(&mut self, tail: Option<NodeId>) {
        self.selected_activity_tail = tail;
    }

    // -- time travel --------------------------------------------------------

    pub fn pause(&mut self) -> TimeTravelView {
        self.controller.pause(&self.store);
        self.controller.refresh(&self.store)
    }

    pub fn go_to_tick(&mut self, tick_id: TickId) -> TimeTravelView {
        self.controller.go_to_tick(tick_id);
        self.controller.refresh(&self.store)
    }

    pub fn step_forward(&mut self) -> TimeTravelView {
        self.controller.step_forward(&self.store);
        self.controller.refresh(&self.store)
    }

    pub fn step_back(&mut self) -> TimeTravelView {
        self.controller.step_back(&self.store);
        self.controller.refresh(&self.store)
    }

    pub fn jump_to_live(&mut self) -> TimeTravelView {
        self.controller.jump_to_live();
        self.controller.refresh(&self.store)
    }

    // -- inspection ---------------------------------------------------------

    /// Flame graph and hot nodes for the viewed tick.
    ///
    /// While paused the numbers come from an exact-percentile copy of the
    /// store, taken once per ingestion generation.
    pub fn performance(&mut self) -> PerformanceView {
        let viewed = self.controller.viewed_tick_id(&self.store);
        if self.controller.mode() == ViewMode::Live {
            self.frozen_copy = None;
            return self
                .performance
                .project(&self.store, viewed, self.selected_node_id);
        }

        let generation = self.synchronizer.generation();
        if self.frozen_copy.as_ref().map(|(g, _)| *g) != Some(generation) {
            debug!(generation, "taking exact-percentile copy of the store");
            let copy = self.store.clone_for_time_travel(TimeTravelCloneOptions {
                exact_percentiles: true,
            });
            self.frozen_copy = Some((generation, copy));
        }
        let store = self
            .frozen_copy
            .as_ref()
            .map(|(_, copy)| copy)
            .unwrap_or(&self.store);
        self.performance.project(store, viewed, self.selected_node_id)
    }

    /// Everything the store knows about one node, relative to the viewed
    /// tick. `None` when no tree is loaded or the node is not in it.
    pub fn inspect_node(&self, node_id: NodeId) -> Option<NodeInspection> {
        let (tree, _) = self.layout.as_ref()?;
        let node = tree.node(node_id)?;
        let viewed = self.controller.viewed_tick_id(&self.store);
        Some(NodeInspection {
            node_id,
            label: node.label().to_owned(),
            path: tree.path_to(node_id),
            at_viewed_tick: viewed.and_then(|id| self.store.node_at_tick(node_id, id)),
            remembered: self.store.last_display_state(node_id, viewed),
            summary: self.store.node_result_summary(node_id),
            history_len: self.store.node_history(node_id).len(),
            profiling: self.store.node_profiling(node_id),
        })
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read a JSON trace fixture into a shareable tree and its tick sequence.
pub fn load_trace_file(path: impl AsRef<Path>) -> anyhow::Result<(Arc<BehaviorTree>, Vec<Tick>)> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trace file {}", path.display()))?;
    let file = TraceFile::from_json_str(&text)
        .with_context(|| format!("failed to parse trace file {}", path.display()))?;
    let tree = file
        .tree()
        .with_context(|| format!("invalid tree in {}", path.display()))?;
    Ok((Arc::new(tree), file.ticks))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_trace::prelude::*;

    fn tree() -> Arc<BehaviorTree> {
        Arc::new(
            TreeBuilder::new()
                .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SELECTOR, None)
                .node(2, "Patrol", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
                .node(3, "Chase", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
                .build()
                .unwrap(),
        )
    }

    fn tick(id: TickId, running: NodeId) -> Tick {
        Tick::new(id, Some(id as f64))
            .with_event(NodeEvent::new(1, NodeResult::Running).with_cpu_time(2.0))
            .with_event(NodeEvent::new(running, NodeResult::Running).with_cpu_time(1.0))
    }

    // -- config -------------------------------------------------------------

    #[test]
    fn config_defaults_missing_fields() {
        let config = ReplayConfig::from_json_str(r#"{"hot_node_limit": 3}"#).unwrap();
        assert_eq!(config.hot_node_limit, 3);
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.activity_mode, ActivityMode::Running);
    }

    #[test]
    fn config_rejects_bad_json() {
        assert!(matches!(
            ReplayConfig::from_json_str("{"),
            Err(ReplayError::Config(_))
        ));
    }

    // -- update -------------------------------------------------------------

    #[test]
    fn layout_is_cached_per_tree_identity() {
        let tree = tree();
        let mut session = DebugSession::default();
        session.update(Some(&tree), &[tick(1, 2)]);
        let first = Arc::clone(session.layout().unwrap());
        session.update(Some(&tree), &[tick(1, 2), tick(2, 2)]);
        assert!(Arc::ptr_eq(&first, session.layout().unwrap()));

        let swapped = self::tree();
        session.update(Some(&swapped), &[tick(1, 2)]);
        assert!(!Arc::ptr_eq(&first, session.layout().unwrap()));
    }

    #[test]
    fn vanished_activity_tail_is_cleared() {
        let tree = tree();
        let mut session = DebugSession::default();
        session.update(Some(&tree), &[tick(1, 2)]);
        session.select_activity_tail(Some(2));

        let frame = session.update(Some(&tree), &[tick(1, 2), tick(2, 2)]);
        assert_eq!(session.selected_activity_tail(), Some(2));
        assert!(frame.graph.node(2).unwrap().view.is_activity_tail);

        let frame = session.update(Some(&tree), &[tick(1, 2), tick(2, 2), tick(3, 3)]);
        assert_eq!(session.selected_activity_tail(), None);
        assert!(frame.graph.nodes.iter().all(|n| !n.view.is_activity_tail));
        assert!(frame.graph.edges.iter().all(|e| !e.is_on_activity_path));
    }

    #[test]
    fn select_node_checks_current_tree() {
        let tree = tree();
        let mut session = DebugSession::default();
        // No tree yet: nothing to validate against.
        session.select_node(Some(99)).unwrap();
        session.update(Some(&tree), &[]);
        // The arriving tree has no node 99.
        assert_eq!(session.selected_node_id(), None);
        assert!(matches!(
            session.select_node(Some(99)),
            Err(ReplayError::UnknownNode { node_id: 99 })
        ));
        session.select_node(Some(3)).unwrap();
        assert_eq!(session.selected_node_id(), Some(3));
    }

    // -- inspection ---------------------------------------------------------

    #[test]
    fn paused_performance_uses_exact_copy_per_generation() {
        let tree = tree();
        let mut session = DebugSession::default();
        session.update(Some(&tree), &[tick(1, 2), tick(2, 3)]);
        session.pause();

        let view = session.performance();
        assert_eq!(view.tick_id, Some(2));
        assert_eq!(view.frames.len(), 2);
        let generation = session.frozen_copy.as_ref().map(|(g, _)| *g);
        assert_eq!(generation, Some(session.generation()));

        session.update(Some(&tree), &[tick(1, 2), tick(2, 3), tick(3, 2)]);
        session.performance();
        assert_eq!(
            session.frozen_copy.as_ref().map(|(g, _)| *g),
            Some(session.generation())
        );
        assert_ne!(generation, Some(session.generation()));

        session.jump_to_live();
        session.performance();
        assert!(session.frozen_copy.is_none());
    }

    #[test]
    fn inspect_node_reports_viewed_tick() {
        let tree = tree();
        let mut session = DebugSession::default();
        session.update(Some(&tree), &[tick(1, 2), tick(2, 3)]);
        session.go_to_tick(1);

        let inspection = session.inspect_node(2).unwrap();
        assert_eq!(inspection.label, "Patrol");
        assert_eq!(inspection.path, vec![1, 2]);
        assert_eq!(
            inspection.at_viewed_tick.map(|n| n.result),
            Some(NodeResult::Running)
        );
        assert_eq!(inspection.summary.running, 1);
        assert_eq!(inspection.history_len, 1);
        assert!(session.inspect_node(42).is_none());
    }
}
