//! Tick records produced by an instrumented runtime.
//!
//! A [`Tick`] is one evaluation cycle of the tree: the nodes that ran, the
//! result each returned, optional display state and cpu time, plus any
//! blackboard/ref mutations observed during the cycle. Ticks arrive in
//! ascending [`TickId`] order; the producer owns the sequence and may
//! truncate it at any time.

use serde::{Deserialize, Serialize};

use crate::state::DisplayState;
use crate::tree::NodeId;

/// Monotonically increasing tick identity.
pub type TickId = u64;

/// Result a node returned on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResult {
    Success,
    Failure,
    Running,
}

/// A single node's report for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub node_id: NodeId,
    pub result: NodeResult,
    /// Display state, if the node reported any on this tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DisplayState>,
    /// Inclusive cpu time in milliseconds, if the runtime is profiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_time: Option<f64>,
}

impl NodeEvent {
    pub fn new(node_id: NodeId, result: NodeResult) -> Self {
        Self {
            node_id,
            result,
            state: None,
            cpu_time: None,
        }
    }

    pub fn with_state(mut self, state: DisplayState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_cpu_time(mut self, millis: f64) -> Self {
        self.cpu_time = Some(millis);
        self
    }
}

/// A mutation of a shared ref (blackboard entry) observed during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefEvent {
    /// The node that performed the write, when the runtime knows it.
    #[serde(default)]
    pub node_id: Option<NodeId>,
    pub ref_name: String,
    pub value: serde_json::Value,
    /// The write happened from an async continuation rather than inline.
    #[serde(default)]
    pub is_async: bool,
}

/// One evaluation cycle of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub tick_id: TickId,
    /// The runtime's "now" for this tick. Either an application counter or a
    /// wall-clock epoch value; the unit is not declared.
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub events: Vec<NodeEvent>,
    #[serde(default)]
    pub ref_events: Vec<RefEvent>,
}

impl Tick {
    pub fn new(tick_id: TickId, timestamp: Option<f64>) -> Self {
        Self {
            tick_id,
            timestamp,
            events: Vec::new(),
            ref_events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: NodeEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_ref_event(mut self, event: RefEvent) -> Self {
        self.ref_events.push(event);
        self
    }
}
