//! Self-contained trace bundles.
//!
//! A [`TraceFile`] pairs a tree description with the ticks recorded against
//! it. It is the fixture format for tests and demos; live producers feed the
//! replay core directly and never go through a file.

use serde::{Deserialize, Serialize};

use crate::tick::Tick;
use crate::tree::{BehaviorTree, NodeSpec};
use crate::TraceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFile {
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub ticks: Vec<Tick>,
}

impl TraceFile {
    pub fn from_json_str(json: &str) -> Result<Self, TraceError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build the tree described by [`nodes`](Self::nodes).
    pub fn tree(&self) -> Result<BehaviorTree, TraceError> {
        BehaviorTree::from_specs(self.nodes.clone())
    }
}
