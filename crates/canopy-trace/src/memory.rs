//! In-memory [`TickStore`] with a bounded retention window.
//!
//! Ticks are kept in a ring ([`VecDeque`]) in ascending id order. Two
//! per-node indices are maintained alongside so the common debugger queries
//! don't scan the window:
//!
//! - display-state reports keyed by tick (`last_display_state` is a single
//!   ordered-map range lookup),
//! - cpu-time samples in arrival order (profiling, hot nodes).
//!
//! Both indices are pruned as ticks are evicted, so every answer reflects the
//! retained window only.
//!
//! # Example
//!
//! ```
//! use canopy_trace::prelude::*;
//!
//! let tree = TreeBuilder::new()
//!     .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, None)
//!     .node(2, "Wait", NodeFlags::LEAF | NodeFlags::TIME_BASED, Some(1))
//!     .build()
//!     .unwrap();
//!
//! let mut store = MemoryTickStore::new(StoreConfig { max_retained_ticks: 2, ..Default::default() });
//! store.index_tree(&tree);
//! for id in 1..=3 {
//!     store.ingest_tick(&Tick::new(id, Some(id as f64)).with_event(NodeEvent::new(2, NodeResult::Running)));
//! }
//!
//! assert_eq!(store.stored_tick_ids(), vec![2, 3]);
//! assert_eq!(store.stats().total_tick_count, 3);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::state::DisplayState;
use crate::store::{
    ActivityBranch, ActivityMode, ActivitySnapshot, FlameFrame, HotNode, IngestReport,
    NodeSnapshot, ProfilingData, RememberedState, ResultSummary, StoreConfig, StoreStats,
    TickSnapshot, TickStore, TimeTravelCloneOptions,
};
use crate::tick::{NodeEvent, NodeResult, Tick, TickId};
use crate::tree::{BehaviorTree, NodeId};

// ---------------------------------------------------------------------------
// StoredTick
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredTick {
    tick: Tick,
    /// node id -> index into `tick.events`. A node reporting twice keeps its
    /// last event.
    by_node: HashMap<NodeId, usize>,
}

impl StoredTick {
    fn event(&self, node_id: NodeId) -> Option<&NodeEvent> {
        self.by_node.get(&node_id).map(|&i| &self.tick.events[i])
    }

    fn snapshot(&self, node_id: NodeId) -> Option<NodeSnapshot> {
        self.event(node_id).map(|e| NodeSnapshot {
            node_id,
            tick_id: self.tick.tick_id,
            result: e.result,
            state: e.state.clone(),
            cpu_time: e.cpu_time,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryTickStore
// ---------------------------------------------------------------------------

/// Reference tick store keeping a bounded window of ticks in memory.
#[derive(Debug, Clone)]
pub struct MemoryTickStore {
    config: StoreConfig,
    tree: Option<BehaviorTree>,
    ticks: VecDeque<StoredTick>,
    /// Ticks accepted since the last reset.
    total_ingested: u64,
    /// Id of the last accepted tick, kept across eviction.
    last_tick_id: Option<TickId>,
    states: HashMap<NodeId, BTreeMap<TickId, DisplayState>>,
    samples: HashMap<NodeId, VecDeque<(TickId, f64)>>,
}

impl Default for MemoryTickStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl MemoryTickStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            tree: None,
            ticks: VecDeque::new(),
            total_ingested: 0,
            last_tick_id: None,
            states: HashMap::new(),
            samples: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn tree(&self) -> Option<&BehaviorTree> {
        self.tree.as_ref()
    }

    fn find(&self, tick_id: TickId) -> Option<&StoredTick> {
        self.ticks
            .binary_search_by_key(&tick_id, |t| t.tick.tick_id)
            .ok()
            .map(|i| &self.ticks[i])
    }

    fn evict_oldest(&mut self) {
        let Some(evicted) = self.ticks.pop_front() else {
            return;
        };
        let evicted_id = evicted.tick.tick_id;
        for node_id in evicted.by_node.keys() {
            if let Some(states) = self.states.get_mut(node_id) {
                states.remove(&evicted_id);
                if states.is_empty() {
                    self.states.remove(node_id);
                }
            }
            if let Some(samples) = self.samples.get_mut(node_id) {
                while samples.front().is_some_and(|&(id, _)| id <= evicted_id) {
                    samples.pop_front();
                }
                if samples.is_empty() {
                    self.samples.remove(node_id);
                }
            }
        }
        trace!(tick_id = evicted_id, "evicted tick");
    }

    fn node_label(&self, node_id: NodeId) -> String {
        self.tree
            .as_ref()
            .and_then(|t| t.node(node_id))
            .map(|n| n.label().to_owned())
            .unwrap_or_else(|| format!("#{node_id}"))
    }

    fn root_cpu_time(&self) -> f64 {
        let Some(root) = self.tree.as_ref().map(BehaviorTree::root_id) else {
            return 0.0;
        };
        self.samples
            .get(&root)
            .map(|s| s.iter().map(|&(_, t)| t).sum())
            .unwrap_or(0.0)
    }

    fn activity_for(&self, stored: &StoredTick, mode: ActivityMode) -> ActivitySnapshot {
        let mut snapshot = ActivitySnapshot {
            tick_id: Some(stored.tick.tick_id),
            branches: Vec::new(),
        };
        let Some(tree) = &self.tree else {
            return snapshot;
        };

        // Pre-order walk so branches come out in tree order.
        let mut stack = vec![tree.root_id()];
        while let Some(id) = stack.pop() {
            let Some(node) = tree.node(id) else {
                continue;
            };
            stack.extend(node.children_ids.iter().rev());

            let Some(event) = stored.event(id) else {
                continue;
            };
            let has_executed_child = node
                .children_ids
                .iter()
                .any(|c| stored.by_node.contains_key(c));
            if has_executed_child {
                continue;
            }
            if mode == ActivityMode::Running && event.result != NodeResult::Running {
                continue;
            }
            let path_node_ids = tree.path_to(id);
            let labels = path_node_ids
                .iter()
                .filter_map(|p| tree.node(*p))
                .map(|n| n.label().to_owned())
                .collect();
            snapshot.branches.push(ActivityBranch {
                tail_node_id: id,
                tail_result: event.result,
                labels,
                path_node_ids,
            });
        }
        snapshot
    }

    fn flame_walk(
        &self,
        tree: &BehaviorTree,
        stored: &StoredTick,
        node_id: NodeId,
        start: f64,
        depth: u32,
        frames: &mut Vec<FlameFrame>,
    ) {
        let Some(node) = tree.node(node_id) else {
            return;
        };
        let (child_depth, mut cursor) = match stored.event(node_id) {
            Some(NodeEvent {
                result,
                cpu_time: Some(duration),
                ..
            }) => {
                frames.push(FlameFrame {
                    node_id,
                    name: node.label().to_owned(),
                    depth,
                    start,
                    duration: *duration,
                    result: *result,
                });
                (depth + 1, start)
            }
            _ => (depth, start),
        };
        for &child in &node.children_ids {
            let before = frames.len();
            self.flame_walk(tree, stored, child, cursor, child_depth, frames);
            // Advance past the child's own frame, if it produced one.
            if let Some(frame) = frames.get(before) {
                if frame.node_id == child {
                    cursor += frame.duration;
                }
            }
        }
    }
}

/// Nearest-rank percentile of an ascending slice. `sorted` must be non-empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl TickStore for MemoryTickStore {
    fn index_tree(&mut self, tree: &BehaviorTree) {
        debug!(nodes = tree.len(), root = tree.root_id(), "indexing tree");
        self.tree = Some(tree.clone());
    }

    fn reset(&mut self) {
        self.tree = None;
        self.ticks.clear();
        self.total_ingested = 0;
        self.last_tick_id = None;
        self.states.clear();
        self.samples.clear();
    }

    fn ingest_tick(&mut self, tick: &Tick) -> IngestReport {
        let mut report = IngestReport {
            tick_id: tick.tick_id,
            ..IngestReport::default()
        };

        if let Some(last) = self.last_tick_id {
            if tick.tick_id <= last {
                warn!(
                    tick_id = tick.tick_id,
                    last_tick_id = last,
                    "tick id not newer than last ingested tick, skipping"
                );
                return report;
            }
        }

        let mut by_node = HashMap::with_capacity(tick.events.len());
        for (index, event) in tick.events.iter().enumerate() {
            let known = self.tree.as_ref().is_some_and(|t| t.contains(event.node_id));
            if !known {
                report.unknown_node_events += 1;
            }
            by_node.insert(event.node_id, index);
        }
        for (&node_id, &index) in &by_node {
            let event = &tick.events[index];
            if let Some(state) = &event.state {
                self.states
                    .entry(node_id)
                    .or_default()
                    .insert(tick.tick_id, state.clone());
            }
            if let Some(cpu) = event.cpu_time {
                self.samples
                    .entry(node_id)
                    .or_default()
                    .push_back((tick.tick_id, cpu));
            }
        }
        if report.unknown_node_events > 0 {
            debug!(
                tick_id = tick.tick_id,
                count = report.unknown_node_events,
                indexed = self.tree.is_some(),
                "recorded events for unknown nodes"
            );
        }

        report.accepted = true;
        report.events_recorded = by_node.len();
        self.ticks.push_back(StoredTick {
            tick: tick.clone(),
            by_node,
        });
        self.total_ingested += 1;
        self.last_tick_id = Some(tick.tick_id);

        let capacity = self.config.max_retained_ticks.max(1);
        while self.ticks.len() > capacity {
            self.evict_oldest();
            report.evicted += 1;
        }
        trace!(
            tick_id = tick.tick_id,
            events = report.events_recorded,
            evicted = report.evicted,
            "ingested tick"
        );
        report
    }

    fn stored_tick_ids(&self) -> Vec<TickId> {
        self.ticks.iter().map(|t| t.tick.tick_id).collect()
    }

    fn stats(&self) -> StoreStats {
        let oldest = self.ticks.front().map(|t| &t.tick);
        let newest = self.ticks.back().map(|t| &t.tick);
        let profiling_window_span = match (
            oldest.and_then(|t| t.timestamp),
            newest.and_then(|t| t.timestamp),
        ) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };
        StoreStats {
            oldest_tick_id: oldest.map(|t| t.tick_id),
            newest_tick_id: newest.map(|t| t.tick_id),
            total_tick_count: self.total_ingested,
            stored_tick_count: self.ticks.len(),
            total_root_cpu_time: self.root_cpu_time(),
            profiling_window_span,
        }
    }

    fn tick_range(&self, from: TickId, to: TickId) -> Vec<&Tick> {
        if from > to {
            return Vec::new();
        }
        let start = self.ticks.partition_point(|t| t.tick.tick_id < from);
        self.ticks
            .range(start..)
            .take_while(|t| t.tick.tick_id <= to)
            .map(|t| &t.tick)
            .collect()
    }

    fn snapshot_at_tick(&self, tick_id: TickId) -> Option<TickSnapshot> {
        let stored = self.find(tick_id)?;
        let nodes = stored
            .by_node
            .keys()
            .filter_map(|&id| stored.snapshot(id).map(|s| (id, s)))
            .collect();
        Some(TickSnapshot {
            tick_id,
            timestamp: stored.tick.timestamp,
            nodes,
        })
    }

    fn node_at_tick(&self, node_id: NodeId, tick_id: TickId) -> Option<NodeSnapshot> {
        self.find(tick_id)?.snapshot(node_id)
    }

    fn last_display_state(
        &self,
        node_id: NodeId,
        at_or_before: Option<TickId>,
    ) -> Option<RememberedState> {
        let states = self.states.get(&node_id)?;
        let (tick_id, state) = match at_or_before {
            Some(limit) => states.range(..=limit).next_back()?,
            None => states.iter().next_back()?,
        };
        Some(RememberedState {
            tick_id: *tick_id,
            state: state.clone(),
        })
    }

    fn node_history(&self, node_id: NodeId) -> Vec<NodeSnapshot> {
        self.ticks.iter().filter_map(|t| t.snapshot(node_id)).collect()
    }

    fn node_result_summary(&self, node_id: NodeId) -> ResultSummary {
        let mut summary = ResultSummary {
            node_id,
            ..ResultSummary::default()
        };
        for stored in &self.ticks {
            let Some(event) = stored.event(node_id) else {
                continue;
            };
            match event.result {
                NodeResult::Success => summary.success += 1,
                NodeResult::Failure => summary.failure += 1,
                NodeResult::Running => summary.running += 1,
            }
            summary.last_result = Some(event.result);
            summary.last_tick_id = Some(stored.tick.tick_id);
        }
        summary
    }

    fn node_profiling(&self, node_id: NodeId) -> Option<ProfilingData> {
        let samples = self.samples.get(&node_id)?;
        if samples.is_empty() {
            return None;
        }
        let total: f64 = samples.iter().map(|&(_, t)| t).sum();
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, t)| {
                (lo.min(t), hi.max(t))
            });

        let exact = self.config.exact_percentiles;
        let take = if exact {
            samples.len()
        } else {
            self.config.percentile_reservoir.clamp(1, samples.len())
        };
        let mut sorted: Vec<f64> = samples
            .iter()
            .skip(samples.len() - take)
            .map(|&(_, t)| t)
            .collect();
        sorted.sort_by(f64::total_cmp);

        Some(ProfilingData {
            node_id,
            samples: samples.len(),
            total_cpu_time: total,
            mean_cpu_time: total / samples.len() as f64,
            min_cpu_time: min,
            max_cpu_time: max,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            exact,
        })
    }

    fn hot_nodes(&self, limit: usize) -> Vec<HotNode> {
        let root_total = self.root_cpu_time();
        let mut hot: Vec<HotNode> = self
            .samples
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(&node_id, s)| {
                let total: f64 = s.iter().map(|&(_, t)| t).sum();
                HotNode {
                    node_id,
                    name: self.node_label(node_id),
                    total_cpu_time: total,
                    tick_count: s.len(),
                    mean_cpu_time: total / s.len() as f64,
                    share_of_root: if root_total > 0.0 {
                        total / root_total
                    } else {
                        0.0
                    },
                }
            })
            .collect();
        hot.sort_by(|a, b| {
            b.total_cpu_time
                .total_cmp(&a.total_cpu_time)
                .then(a.node_id.cmp(&b.node_id))
        });
        hot.truncate(limit);
        hot
    }

    fn flame_graph_frames(&self, tick_id: TickId) -> Vec<FlameFrame> {
        let (Some(tree), Some(stored)) = (&self.tree, self.find(tick_id)) else {
            return Vec::new();
        };
        let mut frames = Vec::new();
        self.flame_walk(tree, stored, tree.root_id(), 0.0, 0, &mut frames);
        frames
    }

    fn latest_activity(&self, mode: ActivityMode) -> ActivitySnapshot {
        match self.ticks.back() {
            Some(stored) => self.activity_for(stored, mode),
            None => ActivitySnapshot::default(),
        }
    }

    fn activity_at_tick(&self, tick_id: TickId, mode: ActivityMode) -> ActivitySnapshot {
        match self.find(tick_id) {
            Some(stored) => self.activity_for(stored, mode),
            None => ActivitySnapshot::default(),
        }
    }

    fn clone_for_time_travel(&self, options: TimeTravelCloneOptions) -> Self {
        let mut copy = self.clone();
        copy.config.exact_percentiles = options.exact_percentiles;
        copy
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
