//! Performance read model for the viewed tick.
//!
//! All aggregation lives in the [`TickStore`]; this module only decides
//! *which* tick to ask about and bundles the answers.

use canopy_trace::store::{FlameFrame, HotNode, ProfilingData, TickStore};
use canopy_trace::tick::TickId;
use canopy_trace::tree::NodeId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PerformanceView {
    pub tick_id: Option<TickId>,
    /// Flame-graph frames of the viewed tick.
    pub frames: Vec<FlameFrame>,
    pub hot_nodes: Vec<HotNode>,
    pub total_root_cpu_time: f64,
    pub profiling_window_span: Option<f64>,
    /// Profile of the selected node, when one is selected and sampled.
    pub selected: Option<ProfilingData>,
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceProjector {
    hot_node_limit: usize,
}

impl PerformanceProjector {
    pub fn new(hot_node_limit: usize) -> Self {
        Self { hot_node_limit }
    }

    pub fn hot_node_limit(&self) -> usize {
        self.hot_node_limit
    }

    pub fn project<S: TickStore>(
        &self,
        store: &S,
        viewed_tick_id: Option<TickId>,
        selected_node_id: Option<NodeId>,
    ) -> PerformanceView {
        let stats = store.stats();
        PerformanceView {
            tick_id: viewed_tick_id,
            frames: viewed_tick_id
                .map(|id| store.flame_graph_frames(id))
                .unwrap_or_default(),
            hot_nodes: store.hot_nodes(self.hot_node_limit),
            total_root_cpu_time: stats.total_root_cpu_time,
            profiling_window_span: stats.profiling_window_span,
            selected: selected_node_id.and_then(|id| store.node_profiling(id)),
        }
    }
}

impl Default for PerformanceProjector {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_trace::prelude::*;

    fn store() -> MemoryTickStore {
        let tree = TreeBuilder::new()
            .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, None)
            .node(2, "Plan", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
            .node(3, "Move", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
            .build()
            .unwrap();
        let mut store = MemoryTickStore::default();
        store.index_tree(&tree);
        for id in 1..=3 {
            store.ingest_tick(
                &Tick::new(id, Some(id as f64 * 16.0))
                    .with_event(NodeEvent::new(1, NodeResult::Running).with_cpu_time(3.0))
                    .with_event(NodeEvent::new(2, NodeResult::Success).with_cpu_time(2.0))
                    .with_event(NodeEvent::new(3, NodeResult::Running).with_cpu_time(1.0)),
            );
        }
        store
    }

    #[test]
    fn projects_viewed_tick_frames() {
        let store = store();
        let view = PerformanceProjector::new(2).project(&store, Some(2), Some(3));
        assert_eq!(view.tick_id, Some(2));
        assert_eq!(view.frames.len(), 3);
        assert_eq!(view.hot_nodes.len(), 2);
        assert_eq!(view.hot_nodes[0].node_id, 1);
        assert_eq!(view.selected.as_ref().map(|p| p.node_id), Some(3));
        assert_eq!(view.profiling_window_span, Some(32.0));
    }

    #[test]
    fn nothing_viewed_has_no_frames() {
        let store = store();
        let view = PerformanceProjector::default().project(&store, None, None);
        assert!(view.frames.is_empty());
        assert!(view.selected.is_none());
        assert!(!view.hot_nodes.is_empty());
    }
}
