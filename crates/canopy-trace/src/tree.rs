//! Static behavior-tree structure.
//!
//! A [`BehaviorTree`] is the immutable node hierarchy that every tick refers
//! to. It is built once per tree identity through a [`TreeBuilder`], which
//! derives child order and depth from parent links and rejects structurally
//! invalid input.
//!
//! # Example
//!
//! ```
//! use canopy_trace::prelude::*;
//!
//! let tree = TreeBuilder::new()
//!     .node(1, "Root", NodeFlags::COMPOSITE | NodeFlags::SEQUENCE, None)
//!     .node(2, "Patrol", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
//!     .node(3, "Attack", NodeFlags::LEAF | NodeFlags::ACTION, Some(1))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(tree.root_id(), 1);
//! assert_eq!(tree.node(1).unwrap().children_ids, vec![2, 3]);
//! assert_eq!(tree.node(3).unwrap().depth, 1);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::flags::NodeFlags;
use crate::TraceError;

/// Stable integer identity of a tree node.
pub type NodeId = u32;

// ---------------------------------------------------------------------------
// TreeNode
// ---------------------------------------------------------------------------

/// One node of the static tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub node_id: NodeId,
    /// Display name; may be customised by the tree author.
    pub name: String,
    /// Name of the node's kind (e.g. `"Sequence"`), used when `name` is empty.
    pub default_name: String,
    pub flags: NodeFlags,
    pub parent_id: Option<NodeId>,
    /// Children in execution order.
    pub children_ids: Vec<NodeId>,
    /// Distance from the root (root is 0).
    pub depth: u32,
}

impl TreeNode {
    /// The name to show for this node.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.default_name
        } else {
            &self.name
        }
    }
}

// ---------------------------------------------------------------------------
// NodeSpec
// ---------------------------------------------------------------------------

/// Flat description of a node as produced by an instrumented runtime.
///
/// Children and depth are not part of a `NodeSpec`; they are derived by
/// [`TreeBuilder::build`]. Declaration order among siblings is child order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: NodeId,
    pub name: String,
    #[serde(default)]
    pub default_name: String,
    pub flags: NodeFlags,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
}

// ---------------------------------------------------------------------------
// BehaviorTree
// ---------------------------------------------------------------------------

/// The static node hierarchy, indexed by [`NodeId`].
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorTree {
    root_id: NodeId,
    nodes: BTreeMap<NodeId, TreeNode>,
}

impl BehaviorTree {
    /// Build a tree from flat node specs. See [`TreeBuilder::build`].
    pub fn from_specs(specs: Vec<NodeSpec>) -> Result<Self, TraceError> {
        TreeBuilder { specs }.build()
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids from the root down to `id`, inclusive. Empty if `id` is unknown.
    pub fn path_to(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cursor = self.nodes.get(&id);
        while let Some(node) = cursor {
            path.push(node.node_id);
            cursor = node.parent_id.and_then(|p| self.nodes.get(&p));
        }
        path.reverse();
        path
    }

    /// Flatten back into `NodeSpec`s, parents before children.
    pub fn to_specs(&self) -> Vec<NodeSpec> {
        let mut specs = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root_id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            specs.push(NodeSpec {
                node_id: node.node_id,
                name: node.name.clone(),
                default_name: node.default_name.clone(),
                flags: node.flags,
                parent_id: node.parent_id,
            });
            stack.extend(node.children_ids.iter().rev());
        }
        specs
    }
}

// ---------------------------------------------------------------------------
// TreeBuilder
// ---------------------------------------------------------------------------

/// Incremental builder for a [`BehaviorTree`].
#[derive(Debug, Default)]
pub struct TreeBuilder {
    specs: Vec<NodeSpec>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. `default_name` is left empty; use [`spec`](Self::spec) to
    /// set every field.
    pub fn node(self, id: NodeId, name: &str, flags: NodeFlags, parent: Option<NodeId>) -> Self {
        self.spec(NodeSpec {
            node_id: id,
            name: name.to_owned(),
            default_name: String::new(),
            flags,
            parent_id: parent,
        })
    }

    pub fn spec(mut self, spec: NodeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Validate the specs and assemble the tree.
    ///
    /// # Errors
    ///
    /// - [`TraceError::DuplicateNode`] if two specs share an id.
    /// - [`TraceError::UnknownParent`] if a parent id is not declared.
    /// - [`TraceError::MultipleRoots`] / [`TraceError::MissingRoot`] unless
    ///   exactly one spec has no parent.
    /// - [`TraceError::Unreachable`] if some nodes form a cycle detached from
    ///   the root.
    pub fn build(self) -> Result<BehaviorTree, TraceError> {
        let mut nodes: BTreeMap<NodeId, TreeNode> = BTreeMap::new();
        let mut root: Option<NodeId> = None;

        for spec in &self.specs {
            if nodes.contains_key(&spec.node_id) {
                return Err(TraceError::DuplicateNode { node_id: spec.node_id });
            }
            if spec.parent_id.is_none() {
                if let Some(existing) = root {
                    return Err(TraceError::MultipleRoots {
                        first: existing,
                        second: spec.node_id,
                    });
                }
                root = Some(spec.node_id);
            }
            nodes.insert(
                spec.node_id,
                TreeNode {
                    node_id: spec.node_id,
                    name: spec.name.clone(),
                    default_name: spec.default_name.clone(),
                    flags: spec.flags,
                    parent_id: spec.parent_id,
                    children_ids: Vec::new(),
                    depth: 0,
                },
            );
        }

        let root_id = root.ok_or(TraceError::MissingRoot)?;

        // Children in declaration order.
        for spec in &self.specs {
            let Some(parent_id) = spec.parent_id else {
                continue;
            };
            let parent = nodes.get_mut(&parent_id).ok_or(TraceError::UnknownParent {
                node_id: spec.node_id,
                parent_id,
            })?;
            parent.children_ids.push(spec.node_id);
        }

        // Depths by walking down from the root; anything not reached is part
        // of a parent cycle.
        let mut reached = 0usize;
        let mut stack = vec![(root_id, 0u32)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = nodes.get_mut(&id) else {
                continue;
            };
            node.depth = depth;
            reached += 1;
            for child in node.children_ids.clone() {
                stack.push((child, depth + 1));
            }
        }
        if reached != nodes.len() {
            return Err(TraceError::Unreachable {
                count: nodes.len() - reached,
            });
        }

        Ok(BehaviorTree { root_id, nodes })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
