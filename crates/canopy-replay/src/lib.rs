//! Canopy Replay -- live and time-travel views over behavior-tree traces.
//!
//! This crate sits between a tick producer and a renderer. It keeps a
//! [`TickStore`](canopy_trace::store::TickStore) in sync with an external tick
//! sequence, tracks which tick is being viewed, and reconciles each view into
//! a renderer-ready graph that reuses the previous frame's `Arc`s wherever
//! nothing observable changed.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use canopy_replay::prelude::*;
//!
//! let tree = Arc::new(
//!     TreeBuilder::new()
//!         .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, None)
//!         .node(2, "Move", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
//!         .build()
//!         .unwrap(),
//! );
//! let ticks = vec![
//!     Tick::new(1, Some(16.0)).with_event(NodeEvent::new(2, NodeResult::Running)),
//!     Tick::new(2, Some(32.0)).with_event(NodeEvent::new(2, NodeResult::Success)),
//! ];
//!
//! let mut session = DebugSession::default();
//! let frame = session.update(Some(&tree), &ticks);
//! assert_eq!(frame.view.viewed_tick_id, Some(2));
//!
//! session.step_back();
//! let paused = session.update(Some(&tree), &ticks);
//! assert_eq!(paused.view.viewed_tick_id, Some(1));
//! assert_eq!(paused.graph.node(2).unwrap().view.result, Some(NodeResult::Running));
//! ```

#![deny(unsafe_code)]

pub mod ingest;
pub mod layout;
pub mod perf;
pub mod reconcile;
pub mod session;
pub mod time_travel;

/// Re-export the trace crate for convenience.
pub use canopy_trace;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by [`DebugSession`](session::DebugSession) operations.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("invalid replay config: {0}")]
    Config(#[source] serde_json::Error),

    #[error("node {node_id} is not part of the current tree")]
    UnknownNode { node_id: canopy_trace::tree::NodeId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use canopy_trace::prelude::*;

    pub use crate::ingest::{IngestionSynchronizer, SyncAction, SyncOutcome};
    pub use crate::layout::{
        project_layout, DecoratorSlot, LayoutConfig, LayoutEdge, LayoutGraph, LayoutNode, Position,
    };
    pub use crate::perf::{PerformanceProjector, PerformanceView};
    pub use crate::reconcile::{
        ref_events_by_node, DecoratorRow, NodeView, ReconcileInput, ReconcileStats,
        ReconciledGraph, SnapshotReconciler, VisualEdge, VisualNode,
    };
    pub use crate::session::{
        load_trace_file, DebugSession, NodeInspection, ReplayConfig, SessionFrame,
    };
    pub use crate::time_travel::{
        looks_like_epoch, TimeTravelConfig, TimeTravelController, TimeTravelView, ViewMode,
    };
    pub use crate::ReplayError;
}
