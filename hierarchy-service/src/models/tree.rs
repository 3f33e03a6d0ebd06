//! Nested tree views assembled from flat node lists.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::{HierarchyNode, NodeId};

/// Tree node with children for hierarchical responses.
///
/// Serializing nests one level per generation, so callers bound the depth
/// before handing a tree to a serializer. Dropping does not recurse.
#[derive(Debug, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: HierarchyNode,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(node: HierarchyNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut next) = pending.pop() {
            pending.append(&mut next.children);
        }
    }
}

/// One node of a pre-order listing, with its depth in the assembled tree.
#[derive(Debug, Clone, Serialize)]
pub struct FlatTreeNode {
    #[serde(flatten)]
    pub node: HierarchyNode,
    /// 1 for the roots (and promoted orphans) of the listing.
    pub depth: usize,
}

/// Depth-independent form of an `AssembledTree`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlatTree {
    pub orphans: Vec<NodeId>,
    pub nodes: Vec<FlatTreeNode>,
}

/// Result of assembling a flat list: ordered roots plus nodes that had to be
/// promoted to roots because their parent was missing or filtered out.
#[derive(Debug, Default, Serialize)]
pub struct AssembledTree {
    pub roots: Vec<TreeNode>,
    pub orphans: Vec<NodeId>,
}

impl AssembledTree {
    /// Pre-order walk (parent before children, siblings in order).
    pub fn preorder(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&TreeNode> = self.roots.iter().rev().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(current.children.iter().rev());
        }
        out
    }

    /// Pre-order listing with depths; parents precede their children.
    pub fn flatten(&self) -> FlatTree {
        let mut nodes = Vec::new();
        let mut stack: Vec<(&TreeNode, usize)> = self.roots.iter().rev().map(|r| (r, 1)).collect();
        while let Some((current, depth)) = stack.pop() {
            nodes.push(FlatTreeNode {
                node: current.node.clone(),
                depth,
            });
            stack.extend(current.children.iter().rev().map(|c| (c, depth + 1)));
        }
        FlatTree {
            orphans: self.orphans.clone(),
            nodes,
        }
    }

    pub fn flatten_ids(&self) -> Vec<NodeId> {
        self.preorder().into_iter().map(TreeNode::id).collect()
    }

    /// Flattened id → node map view.
    pub fn index(&self) -> HashMap<NodeId, &TreeNode> {
        self.preorder().into_iter().map(|n| (n.id(), n)).collect()
    }

    pub fn node_count(&self) -> usize {
        self.preorder().len()
    }

    pub fn leaves(&self) -> Vec<&TreeNode> {
        self.preorder().into_iter().filter(|n| n.is_leaf()).collect()
    }

    /// Depth of the deepest assembled branch; roots count as depth 1.
    pub fn max_depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack: Vec<(&TreeNode, usize)> = self.roots.iter().map(|r| (r, 1)).collect();
        while let Some((current, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(current.children.iter().map(|c| (c, depth + 1)));
        }
        deepest
    }

    /// Chain of assembled nodes from a root down to `id`, inclusive.
    pub fn path_to(&self, id: NodeId) -> Option<Vec<&TreeNode>> {
        let mut parent_of: HashMap<NodeId, &TreeNode> = HashMap::new();
        let mut by_id: HashMap<NodeId, &TreeNode> = HashMap::new();
        let mut stack: Vec<&TreeNode> = self.roots.iter().collect();
        while let Some(current) = stack.pop() {
            by_id.insert(current.id(), current);
            for child in &current.children {
                parent_of.insert(child.id(), current);
                stack.push(child);
            }
        }

        let mut chain = vec![*by_id.get(&id)?];
        let mut cursor = id;
        while let Some(&parent) = parent_of.get(&cursor) {
            chain.push(parent);
            cursor = parent.id();
        }
        chain.reverse();
        Some(chain)
    }

    pub fn stats(&self) -> TreeStats {
        let nodes = self.preorder();
        let mut by_level = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        for n in &nodes {
            *by_level.entry(n.node.level).or_insert(0) += 1;
            *by_status.entry(n.node.status.as_str().to_string()).or_insert(0) += 1;
        }

        TreeStats {
            node_count: nodes.len(),
            root_count: self.roots.len(),
            leaf_count: nodes.iter().filter(|n| n.is_leaf()).count(),
            orphan_count: self.orphans.len(),
            max_depth: self.max_depth(),
            by_level,
            by_status,
        }
    }
}

/// Aggregate shape of a hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub node_count: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub orphan_count: usize,
    pub max_depth: usize,
    pub by_level: BTreeMap<i32, usize>,
    pub by_status: BTreeMap<String, usize>,
}
