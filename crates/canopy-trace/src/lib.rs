//! Canopy Trace -- behavior-tree trace model and tick store.
//!
//! This crate defines the data every other part of the debugger speaks:
//!
//! - [`tree`]: the static node hierarchy ([`BehaviorTree`](tree::BehaviorTree))
//!   and its capability [`flags`].
//! - [`tick`]: per-cycle node events and ref mutations.
//! - [`state`]: the display-state tagged union.
//! - [`store`]: the [`TickStore`](store::TickStore) query contract, with an
//!   in-memory implementation in [`memory`].
//!
//! # Quick Start
//!
//! ```
//! use canopy_trace::prelude::*;
//!
//! let tree = TreeBuilder::new()
//!     .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SELECTOR, None)
//!     .node(2, "Chase", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
//!     .build()
//!     .unwrap();
//!
//! let mut store = MemoryTickStore::default();
//! store.index_tree(&tree);
//! store.ingest_tick(
//!     &Tick::new(1, Some(0.0))
//!         .with_event(NodeEvent::new(1, NodeResult::Running))
//!         .with_event(NodeEvent::new(2, NodeResult::Running)),
//! );
//!
//! let activity = store.latest_activity(ActivityMode::Running);
//! assert_eq!(activity.branches[0].path_node_ids, vec![1, 2]);
//! ```

#![deny(unsafe_code)]

pub mod flags;
pub mod memory;
pub mod state;
pub mod store;
pub mod tick;
pub mod trace_file;
pub mod tree;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while building trees or decoding trace data.
///
/// Tick ingestion never returns an error; see
/// [`IngestReport`](store::IngestReport).
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("node {node_id} is declared more than once")]
    DuplicateNode { node_id: tree::NodeId },

    #[error("node {node_id} names parent {parent_id}, which is not declared")]
    UnknownParent {
        node_id: tree::NodeId,
        parent_id: tree::NodeId,
    },

    #[error("tree has no root (every node declares a parent)")]
    MissingRoot,

    #[error("tree has more than one root: {first} and {second}")]
    MultipleRoots {
        first: tree::NodeId,
        second: tree::NodeId,
    },

    #[error("{count} node(s) are not reachable from the root (parent cycle)")]
    Unreachable { count: usize },

    #[error("unsupported display state: {details}")]
    UnsupportedDisplayState { details: String },

    #[error("invalid trace JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::flags::NodeFlags;
    pub use crate::memory::MemoryTickStore;
    pub use crate::state::{DisplayState, StateValue, LAST_SCORE_KEY, SCORES_KEY};
    pub use crate::store::{
        ActivityBranch, ActivityMode, ActivitySnapshot, FlameFrame, HotNode, IngestReport,
        NodeSnapshot, ProfilingData, RememberedState, ResultSummary, StoreConfig, StoreStats,
        TickSnapshot, TickStore, TimeTravelCloneOptions,
    };
    pub use crate::tick::{NodeEvent, NodeResult, RefEvent, Tick, TickId};
    pub use crate::trace_file::TraceFile;
    pub use crate::tree::{BehaviorTree, NodeId, NodeSpec, TreeBuilder, TreeNode};
    pub use crate::TraceError;
}
