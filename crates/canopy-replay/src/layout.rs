//! Static layout of a behavior tree.
//!
//! Decorators render as rows stacked on top of the node they wrap rather than
//! as boxes of their own. [`project_layout`] walks the tree, collapses every
//! chain of single-child decorators onto the node at the bottom of the chain
//! (the *host*), and positions hosts with a simple layered tidy-tree layout:
//! leaves are spaced left to right, parents are centred over their children,
//! and rows follow visual depth.
//!
//! A host keeps track of every node id it stands for in
//! [`LayoutNode::represented_node_ids`], which is what selection and
//! activity highlighting match against.
//!
//! The graph depends only on the tree, so callers compute it once per tree
//! identity.

use std::collections::HashMap;

use canopy_trace::flags::NodeFlags;
use canopy_trace::tree::{BehaviorTree, NodeId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LayoutConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub node_width: f64,
    pub node_height: f64,
    pub horizontal_gap: f64,
    pub vertical_gap: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_width: 160.0,
            node_height: 48.0,
            horizontal_gap: 24.0,
            vertical_gap: 56.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A decorator collapsed onto a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoratorSlot {
    pub node_id: NodeId,
    pub name: String,
    pub flags: NodeFlags,
}

/// One visual box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub host_id: NodeId,
    pub name: String,
    pub flags: NodeFlags,
    pub position: Position,
    /// The host itself followed by every collapsed decorator, outermost first.
    pub represented_node_ids: Vec<NodeId>,
    /// Non-lifecycle decorators, outermost first.
    pub stacked_decorators: Vec<DecoratorSlot>,
    pub lifecycle_decorators: Vec<DecoratorSlot>,
    pub parent_host_id: Option<NodeId>,
    pub child_host_ids: Vec<NodeId>,
}

impl LayoutNode {
    pub fn represents(&self, node_id: NodeId) -> bool {
        self.represented_node_ids.contains(&node_id)
    }

    /// Every decorator row, stacked first then lifecycle.
    pub fn decorators(&self) -> impl Iterator<Item = &DecoratorSlot> {
        self.stacked_decorators
            .iter()
            .chain(self.lifecycle_decorators.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutEdge {
    /// `"{source}->{target}"`.
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
}

/// Positioned hosts and the edges between them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayoutGraph {
    /// Hosts in pre-order.
    nodes: Vec<LayoutNode>,
    edges: Vec<LayoutEdge>,
    by_host: HashMap<NodeId, usize>,
    /// Any represented node id -> its host id.
    host_of: HashMap<NodeId, NodeId>,
}

impl LayoutGraph {
    pub fn nodes(&self) -> &[LayoutNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[LayoutEdge] {
        &self.edges
    }

    pub fn node(&self, host_id: NodeId) -> Option<&LayoutNode> {
        self.by_host.get(&host_id).map(|&i| &self.nodes[i])
    }

    /// The host a node id is drawn on.
    pub fn host_of(&self, node_id: NodeId) -> Option<NodeId> {
        self.host_of.get(&node_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Collapse decorators and position every host.
pub fn project_layout(tree: &BehaviorTree, config: &LayoutConfig) -> LayoutGraph {
    let mut graph = LayoutGraph::default();
    collapse(tree, tree.root_id(), None, 0, &mut graph);

    // The root host is first in pre-order (it may not be the root node when
    // the root is a decorator).
    let mut next_leaf = 0usize;
    if !graph.nodes.is_empty() {
        place(&mut graph, 0, config, &mut next_leaf);
    }
    graph
}

fn collapse(
    tree: &BehaviorTree,
    top_id: NodeId,
    parent_host: Option<NodeId>,
    row: usize,
    graph: &mut LayoutGraph,
) {
    // Walk down single-child decorators to find the host.
    let mut chain = Vec::new();
    let mut cursor = top_id;
    let host = loop {
        let Some(node) = tree.node(cursor) else {
            return;
        };
        if node.flags.contains(NodeFlags::DECORATOR) && node.children_ids.len() == 1 {
            chain.push(node);
            cursor = node.children_ids[0];
        } else {
            break node;
        }
    };

    let mut represented_node_ids = vec![host.node_id];
    let mut stacked_decorators = Vec::new();
    let mut lifecycle_decorators = Vec::new();
    for decorator in &chain {
        represented_node_ids.push(decorator.node_id);
        let slot = DecoratorSlot {
            node_id: decorator.node_id,
            name: decorator.label().to_owned(),
            flags: decorator.flags,
        };
        if decorator.flags.is_lifecycle_decorator() {
            lifecycle_decorators.push(slot);
        } else {
            stacked_decorators.push(slot);
        }
    }

    for &id in &represented_node_ids {
        graph.host_of.insert(id, host.node_id);
    }
    graph.by_host.insert(host.node_id, graph.nodes.len());
    graph.nodes.push(LayoutNode {
        host_id: host.node_id,
        name: host.label().to_owned(),
        flags: host.flags,
        // `y` carries the row until `place` runs.
        position: Position { x: 0.0, y: row as f64 },
        represented_node_ids,
        stacked_decorators,
        lifecycle_decorators,
        parent_host_id: parent_host,
        child_host_ids: Vec::new(),
    });

    if let Some(parent) = parent_host {
        if let Some(&index) = graph.by_host.get(&parent) {
            graph.nodes[index].child_host_ids.push(host.node_id);
        }
        graph.edges.push(LayoutEdge {
            id: format!("{parent}->{}", host.node_id),
            source: parent,
            target: host.node_id,
        });
    }

    for &child in &host.children_ids {
        collapse(tree, child, Some(host.node_id), row + 1, graph);
    }
}

/// Post-order placement. Returns the host's x coordinate.
fn place(graph: &mut LayoutGraph, index: usize, config: &LayoutConfig, next_leaf: &mut usize) -> f64 {
    let children: Vec<usize> = graph.nodes[index]
        .child_host_ids
        .iter()
        .filter_map(|id| graph.by_host.get(id).copied())
        .collect();

    let x = if children.is_empty() {
        let x = *next_leaf as f64 * (config.node_width + config.horizontal_gap);
        *next_leaf += 1;
        x
    } else {
        let xs: Vec<f64> = children
            .iter()
            .map(|&c| place(graph, c, config, next_leaf))
            .collect();
        (xs[0] + xs[xs.len() - 1]) / 2.0
    };

    let node = &mut graph.nodes[index];
    let row = node.position.y;
    node.position = Position {
        x,
        y: row * (config.node_height + config.vertical_gap),
    };
    x
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
