//! Re-parenting validation.

use super::error::HierarchyError;
use super::path::PathCodec;
use crate::models::{EntityKind, HierarchyNode};

/// Outcome of a structurally valid re-parent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparentDecision {
    /// The node must move and its subtree be rewritten.
    Proceed,
    /// The node already sits under the requested parent.
    Unchanged,
}

pub struct CycleGuard;

impl CycleGuard {
    /// Checks moving `node` under `candidate` (`None` = root).
    ///
    /// `candidate` must be the parent row as read inside the moving
    /// transaction, so its path cannot change before the move commits.
    pub fn validate_reparent(
        kind: EntityKind,
        node: &HierarchyNode,
        candidate: Option<&HierarchyNode>,
    ) -> Result<ReparentDecision, HierarchyError> {
        let Some(parent) = candidate else {
            return Ok(if node.is_root() {
                ReparentDecision::Unchanged
            } else {
                ReparentDecision::Proceed
            });
        };

        if parent.id == node.id {
            return Err(HierarchyError::Cycle {
                kind,
                node_id: node.id,
                parent_id: parent.id,
            });
        }

        let chain = PathCodec::ancestors_of(parent)?;
        if chain.contains(&node.id) {
            return Err(HierarchyError::Cycle {
                kind,
                node_id: node.id,
                parent_id: parent.id,
            });
        }

        if node.parent_id == Some(parent.id) {
            return Ok(ReparentDecision::Unchanged);
        }
        Ok(ReparentDecision::Proceed)
    }
}
