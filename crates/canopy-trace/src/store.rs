//! The tick store query contract.
//!
//! [`TickStore`] is the seam between the replay core and whatever owns tick
//! retention and aggregation. The replay crate only ever talks to this trait:
//! the ingestion side through [`index_tree`](TickStore::index_tree),
//! [`reset`](TickStore::reset) and [`ingest_tick`](TickStore::ingest_tick),
//! and everything else through the `&self` query methods. A reference
//! in-memory implementation lives in [`crate::memory`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::DisplayState;
use crate::tick::{NodeResult, Tick, TickId};
use crate::tree::{BehaviorTree, NodeId};

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Retention and profiling settings for a tick store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Ticks retained before the oldest is evicted. Must be at least 1.
    pub max_retained_ticks: usize,
    /// Recent samples per node used for approximate percentiles.
    pub percentile_reservoir: usize,
    /// Compute percentiles over every retained sample instead of the
    /// reservoir.
    pub exact_percentiles: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retained_ticks: 1000,
            percentile_reservoir: 256,
            exact_percentiles: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Outcome of ingesting one tick. Ingestion never fails; problems are
/// counted here instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub tick_id: TickId,
    /// `false` if the tick id was not newer than the last ingested tick.
    pub accepted: bool,
    pub events_recorded: usize,
    /// Events naming a node absent from the indexed tree (or any event when
    /// no tree is indexed). They are still recorded.
    pub unknown_node_events: usize,
    /// Ticks evicted to make room for this one.
    pub evicted: usize,
}

// ---------------------------------------------------------------------------
// Point-in-time queries
// ---------------------------------------------------------------------------

/// One node's recorded state at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub tick_id: TickId,
    pub result: NodeResult,
    pub state: Option<DisplayState>,
    pub cpu_time: Option<f64>,
}

/// Every node that reported on one tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub tick_id: TickId,
    pub timestamp: Option<f64>,
    pub nodes: HashMap<NodeId, NodeSnapshot>,
}

impl TickSnapshot {
    pub fn get(&self, node_id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.get(&node_id)
    }
}

/// The most recent display state at or before some tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberedState {
    /// The tick that reported the state.
    pub tick_id: TickId,
    pub state: DisplayState,
}

/// Result counts for one node across the retained window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub node_id: NodeId,
    pub success: usize,
    pub failure: usize,
    pub running: usize,
    pub last_result: Option<NodeResult>,
    pub last_tick_id: Option<TickId>,
}

impl ResultSummary {
    pub fn total(&self) -> usize {
        self.success + self.failure + self.running
    }
}

/// Store-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub oldest_tick_id: Option<TickId>,
    pub newest_tick_id: Option<TickId>,
    /// Ticks ingested since the last reset, including evicted ones.
    pub total_tick_count: u64,
    /// Ticks currently retained.
    pub stored_tick_count: usize,
    /// Sum of the root node's cpu time over the retained window.
    pub total_root_cpu_time: f64,
    /// Timestamp distance between the oldest and newest retained tick.
    pub profiling_window_span: Option<f64>,
}

// ---------------------------------------------------------------------------
// Profiling
// ---------------------------------------------------------------------------

/// Cpu-time distribution for one node over the retained window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingData {
    pub node_id: NodeId,
    pub samples: usize,
    pub total_cpu_time: f64,
    pub mean_cpu_time: f64,
    pub min_cpu_time: f64,
    pub max_cpu_time: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// Whether the percentiles cover every retained sample.
    pub exact: bool,
}

/// A node ranked by cpu time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotNode {
    pub node_id: NodeId,
    pub name: String,
    pub total_cpu_time: f64,
    pub tick_count: usize,
    pub mean_cpu_time: f64,
    /// `total_cpu_time / total_root_cpu_time`, or 0 when the root has no
    /// recorded time.
    pub share_of_root: f64,
}

/// One rectangle of a flame graph for a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlameFrame {
    pub node_id: NodeId,
    pub name: String,
    /// Nesting level among frames (not tree depth).
    pub depth: u32,
    /// Offset in milliseconds from the start of the tick.
    pub start: f64,
    pub duration: f64,
    pub result: NodeResult,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Which tails count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityMode {
    /// Only branches whose tail is still running.
    #[default]
    Running,
    /// Every deepest executed node.
    All,
}

/// A root-to-tail path describing one line of current behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityBranch {
    pub tail_node_id: NodeId,
    pub tail_result: NodeResult,
    /// Node labels along the path, root first.
    pub labels: Vec<String>,
    /// Node ids along the path, root first, ending with the tail.
    pub path_node_ids: Vec<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub tick_id: Option<TickId>,
    pub branches: Vec<ActivityBranch>,
}

impl ActivitySnapshot {
    pub fn branch_with_tail(&self, tail: NodeId) -> Option<&ActivityBranch> {
        self.branches.iter().find(|b| b.tail_node_id == tail)
    }
}

/// Options for [`TickStore::clone_for_time_travel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeTravelCloneOptions {
    pub exact_percentiles: bool,
}

// ---------------------------------------------------------------------------
// TickStore
// ---------------------------------------------------------------------------

/// Tick-indexed storage and query engine.
///
/// Queries are synchronous and bounded by the retained window. Ids returned
/// by [`stored_tick_ids`](Self::stored_tick_ids) are sorted ascending.
pub trait TickStore {
    /// Index the static tree. Replaces any previously indexed tree.
    fn index_tree(&mut self, tree: &BehaviorTree);

    /// Drop every tick, every derived index and the indexed tree.
    fn reset(&mut self);

    /// Append one tick. Never fails; see [`IngestReport`].
    fn ingest_tick(&mut self, tick: &Tick) -> IngestReport;

    fn stored_tick_ids(&self) -> Vec<TickId>;

    fn stats(&self) -> StoreStats;

    /// Retained ticks with `from <= tick_id <= to`, ascending.
    fn tick_range(&self, from: TickId, to: TickId) -> Vec<&Tick>;

    fn snapshot_at_tick(&self, tick_id: TickId) -> Option<TickSnapshot>;

    fn node_at_tick(&self, node_id: NodeId, tick_id: TickId) -> Option<NodeSnapshot>;

    /// Most recent display state reported by `node_id` at or before
    /// `at_or_before` (or at all, when `None`) within the retained window.
    fn last_display_state(
        &self,
        node_id: NodeId,
        at_or_before: Option<TickId>,
    ) -> Option<RememberedState>;

    /// Every retained report of `node_id`, oldest first.
    fn node_history(&self, node_id: NodeId) -> Vec<NodeSnapshot>;

    fn node_result_summary(&self, node_id: NodeId) -> ResultSummary;

    fn node_profiling(&self, node_id: NodeId) -> Option<ProfilingData>;

    /// The `limit` nodes with the highest total cpu time.
    fn hot_nodes(&self, limit: usize) -> Vec<HotNode>;

    fn flame_graph_frames(&self, tick_id: TickId) -> Vec<FlameFrame>;

    fn latest_activity(&self, mode: ActivityMode) -> ActivitySnapshot;

    fn activity_at_tick(&self, tick_id: TickId, mode: ActivityMode) -> ActivitySnapshot;

    /// Independent copy for inspecting a frozen tick, optionally computing
    /// exact percentiles.
    fn clone_for_time_travel(&self, options: TimeTravelCloneOptions) -> Self
    where
        Self: Sized;
}
