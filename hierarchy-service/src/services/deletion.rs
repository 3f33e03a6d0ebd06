//! Deletion safety checks.

use serde::Serialize;

use super::error::HierarchyError;
use super::policy::ReferenceCounter;
use super::store::StoreTx;
use crate::models::{EntityKind, HierarchyNode, NodeId};

/// One reason a node cannot be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeletionBlocker {
    Protected,
    HasChildren { count: usize },
    InUse { references: u64 },
}

/// Every blocker found for a node, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionCheck {
    pub kind: EntityKind,
    pub node_id: NodeId,
    pub blockers: Vec<DeletionBlocker>,
}

impl DeletionCheck {
    pub fn is_allowed(&self) -> bool {
        self.blockers.is_empty()
    }

    /// The highest-precedence blocker as an error, if any.
    pub fn into_error(self) -> Option<HierarchyError> {
        let (kind, id) = (self.kind, self.node_id);
        self.blockers.into_iter().next().map(|blocker| match blocker {
            DeletionBlocker::Protected => HierarchyError::Protected { kind, id },
            DeletionBlocker::HasChildren { count } => HierarchyError::HasChildren {
                kind,
                id,
                children: count,
            },
            DeletionBlocker::InUse { references } => HierarchyError::InUse {
                kind,
                id,
                references,
            },
        })
    }
}

pub struct DeletionGuard;

impl DeletionGuard {
    /// Gathers all blockers. Children and references are read through `tx`,
    /// so a child or reference added concurrently either is seen here or
    /// serializes after the delete.
    pub async fn evaluate(
        tx: &mut dyn StoreTx,
        references: &dyn ReferenceCounter,
        node: &HierarchyNode,
    ) -> Result<DeletionCheck, HierarchyError> {
        let kind = tx.kind();
        let mut blockers = Vec::new();

        if node.is_protected {
            blockers.push(DeletionBlocker::Protected);
        }

        let children = tx.children(Some(node.id)).await?.len();
        if children > 0 {
            blockers.push(DeletionBlocker::HasChildren { count: children });
        }

        let refs = references.count_references(tx, node.id).await?;
        if refs > 0 {
            blockers.push(DeletionBlocker::InUse { references: refs });
        }

        Ok(DeletionCheck {
            kind,
            node_id: node.id,
            blockers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeDraft, NodeStatus};
    use crate::services::memory::MemoryHierarchyStore;
    use crate::services::policy::{InMemoryReferences, NoReferences};
    use crate::services::store::HierarchyStore;
    use chrono::Utc;

    const KIND: EntityKind = EntityKind::Role;

    fn draft(parent_id: Option<NodeId>, path: &str, is_protected: bool) -> NodeDraft {
        NodeDraft {
            parent_id,
            path: path.to_string(),
            level: if path.is_empty() { 1 } else { 2 },
            sort_order: 1,
            status: NodeStatus::Enabled,
            is_protected,
            attributes: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reports_all_blockers_in_precedence_order() {
        let store = MemoryHierarchyStore::new();
        let refs = InMemoryReferences::new();
        let mut tx = store.begin(KIND).await.unwrap();
        let admin = tx.insert(draft(None, "", true)).await.unwrap();
        tx.insert(draft(Some(admin.id), "/1", false)).await.unwrap();
        refs.set(KIND, admin.id, 4);

        let check = DeletionGuard::evaluate(tx.as_mut(), &refs, &admin).await.unwrap();
        assert!(!check.is_allowed());
        assert_eq!(
            check.blockers,
            vec![
                DeletionBlocker::Protected,
                DeletionBlocker::HasChildren { count: 1 },
                DeletionBlocker::InUse { references: 4 },
            ]
        );
        assert!(matches!(check.into_error(), Some(HierarchyError::Protected { .. })));
    }

    #[tokio::test]
    async fn leaf_without_references_is_deletable() {
        let store = MemoryHierarchyStore::new();
        let mut tx = store.begin(KIND).await.unwrap();
        let leaf = tx.insert(draft(None, "", false)).await.unwrap();

        let check = DeletionGuard::evaluate(tx.as_mut(), &NoReferences, &leaf).await.unwrap();
        assert!(check.is_allowed());
        assert!(check.into_error().is_none());
    }

    #[test]
    fn blockers_serialize_with_reason_tag() {
        let json = serde_json::to_value(DeletionBlocker::HasChildren { count: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({ "reason": "has_children", "count": 2 }));
    }
}
