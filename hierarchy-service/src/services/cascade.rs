//! Subtree path/level rewrite after a move.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

use super::error::HierarchyError;
use super::path::{PathCodec, PATH_SEPARATOR};
use super::store::StoreTx;
use crate::models::{HierarchyNode, NodeId};

pub struct CascadeRewriter;

impl CascadeRewriter {
    /// Rewrites every live descendant of `moved`, whose own row already
    /// carries its new path and level. `old_path` is `moved`'s path before
    /// the move. Returns the number of descendants rewritten.
    ///
    /// Runs breadth-first over an explicit queue inside `tx`; any error
    /// leaves the rollback to the caller, so nothing of the move survives.
    pub async fn rewrite_subtree(
        tx: &mut dyn StoreTx,
        moved: &HierarchyNode,
        old_path: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, HierarchyError> {
        let mut queue: VecDeque<(HierarchyNode, String)> = VecDeque::new();
        let mut visited: HashSet<NodeId> = HashSet::from([moved.id]);
        queue.push_back((moved.clone(), old_path.to_string()));
        let mut rewritten = 0;

        while let Some((parent, parent_old_path)) = queue.pop_front() {
            let expected_old = format!("{}{}{}", parent_old_path, PATH_SEPARATOR, parent.id);
            let new_path = PathCodec::child_prefix(&parent);

            for mut child in tx.children(Some(parent.id)).await? {
                if !visited.insert(child.id) {
                    return Err(HierarchyError::integrity(
                        Some(child.id),
                        format!("node {} reached twice while rewriting subtree", child.id),
                    ));
                }
                if child.path != expected_old {
                    return Err(HierarchyError::integrity(
                        Some(child.id),
                        format!(
                            "node {} has path '{}', expected '{}' under parent {}",
                            child.id, child.path, expected_old, parent.id
                        ),
                    ));
                }

                let child_old_path = std::mem::replace(&mut child.path, new_path.clone());
                child.level = parent.level + 1;
                child.updated_at = at;
                tx.save(&mut child).await?;
                rewritten += 1;
                queue.push_back((child, child_old_path));
            }
        }

        Ok(rewritten)
    }
}
