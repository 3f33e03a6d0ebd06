//! Nested tree assembly from flat node lists.

use std::collections::{HashMap, HashSet};

use super::error::HierarchyError;
use super::path::PathCodec;
use crate::models::{AssembledTree, HierarchyNode, NodeId, TreeNode};

pub struct TreeAssembler;

struct Slot {
    id: NodeId,
    node: Option<HierarchyNode>,
    children: Vec<usize>,
}

/// Flat arena grown without recursion; children always land after their parent.
struct Arena {
    slots: Vec<Slot>,
    groups: HashMap<Option<NodeId>, Vec<HierarchyNode>>,
}

impl Arena {
    fn push(&mut self, node: HierarchyNode) -> usize {
        self.slots.push(Slot {
            id: node.id,
            node: Some(node),
            children: Vec::new(),
        });
        self.slots.len() - 1
    }

    fn grow_from(&mut self, root: HierarchyNode) -> usize {
        let root_idx = self.push(root);
        let mut stack = vec![root_idx];
        while let Some(idx) = stack.pop() {
            let kids = self
                .groups
                .remove(&Some(self.slots[idx].id))
                .unwrap_or_default();
            for kid in kids {
                let kid_idx = self.push(kid);
                self.slots[idx].children.push(kid_idx);
                stack.push(kid_idx);
            }
        }
        root_idx
    }

    /// Pulls every node not yet placed, in level then sibling order.
    fn drain_unplaced(&mut self) -> Vec<HierarchyNode> {
        let mut rest: Vec<HierarchyNode> = self.groups.drain().flat_map(|(_, v)| v).collect();
        rest.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.sibling_cmp(b)));
        rest
    }

    fn regroup(&mut self, nodes: Vec<HierarchyNode>) {
        for node in nodes {
            self.groups.entry(node.parent_id).or_default().push(node);
        }
        for group in self.groups.values_mut() {
            group.sort_by(|a, b| a.sibling_cmp(b));
        }
    }

    fn into_roots(mut self, tops: &[usize]) -> Vec<TreeNode> {
        let mut built: Vec<Option<TreeNode>> = (0..self.slots.len()).map(|_| None).collect();
        for idx in (0..self.slots.len()).rev() {
            let children = std::mem::take(&mut self.slots[idx].children)
                .into_iter()
                .filter_map(|c| built[c].take())
                .collect();
            if let Some(node) = self.slots[idx].node.take() {
                built[idx] = Some(TreeNode { node, children });
            }
        }
        tops.iter().filter_map(|&i| built[i].take()).collect()
    }
}

impl TreeAssembler {
    /// Nests `nodes` under `root_parent` (`None` = true roots).
    ///
    /// Deleted nodes are dropped. Siblings are ordered by sort order, then
    /// creation time, then id. A node whose parent is neither present nor
    /// `root_parent` is promoted to an extra root after the regular ones and
    /// reported in `orphans`; so is any node caught in a parent cycle.
    pub fn build_tree(nodes: Vec<HierarchyNode>, root_parent: Option<NodeId>) -> AssembledTree {
        let mut arena = Arena {
            slots: Vec::with_capacity(nodes.len()),
            groups: HashMap::new(),
        };
        arena.regroup(nodes.into_iter().filter(HierarchyNode::is_live).collect());

        let mut tops = Vec::new();
        for root in arena.groups.remove(&root_parent).unwrap_or_default() {
            tops.push(arena.grow_from(root));
        }

        let mut orphans = Vec::new();
        let rest = arena.drain_unplaced();
        if !rest.is_empty() {
            let present: HashSet<NodeId> = rest.iter().map(|n| n.id).collect();
            let (detached, attached): (Vec<_>, Vec<_>) = rest
                .into_iter()
                .partition(|n| n.parent_id.is_none_or(|p| !present.contains(&p)));
            arena.regroup(attached);
            for orphan in detached {
                orphans.push(orphan.id);
                tops.push(arena.grow_from(orphan));
            }
        }

        // Whatever is left only points at itself through a parent cycle.
        loop {
            let mut rest = arena.drain_unplaced();
            if rest.is_empty() {
                break;
            }
            let head = rest.remove(0);
            arena.regroup(rest);
            orphans.push(head.id);
            tops.push(arena.grow_from(head));
        }

        if !orphans.is_empty() {
            tracing::warn!(
                orphan_count = orphans.len(),
                orphans = ?orphans,
                "Promoted orphaned nodes to roots while assembling tree"
            );
        }

        AssembledTree {
            roots: arena.into_roots(&tops),
            orphans,
        }
    }

    /// Live, enabled nodes only. Disabled ancestors do not hide their descendants.
    pub fn flatten_enabled_only(nodes: Vec<HierarchyNode>) -> Vec<HierarchyNode> {
        nodes
            .into_iter()
            .filter(|n| n.is_live() && n.is_enabled())
            .collect()
    }

    /// Live nodes with no disabled node anywhere on their ancestor chain
    /// (as far as that chain is present in `nodes`).
    pub fn hide_disabled_subtrees(
        nodes: Vec<HierarchyNode>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let live: Vec<HierarchyNode> = nodes.into_iter().filter(HierarchyNode::is_live).collect();
        let disabled: HashSet<NodeId> = live
            .iter()
            .filter(|n| !n.is_enabled())
            .map(|n| n.id)
            .collect();

        let mut visible = Vec::with_capacity(live.len());
        for node in live {
            if disabled.contains(&node.id) {
                continue;
            }
            let ancestors = PathCodec::ancestors_of(&node)?;
            if ancestors.iter().any(|id| disabled.contains(id)) {
                continue;
            }
            visible.push(node);
        }
        Ok(visible)
    }
}
