//! Per-kind policies injected into the hierarchy manager.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::error::HierarchyError;
use super::store::StoreTx;
use crate::models::{EntityKind, NodeId};

/// Counts live cross-entity references to a node (users in a department,
/// roles holding a permission, ...) inside the caller's transaction, so the
/// count and the write it guards share one snapshot.
#[async_trait]
pub trait ReferenceCounter: Send + Sync {
    async fn count_references(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
    ) -> Result<u64, HierarchyError>;
}

/// Nothing references any node.
pub struct NoReferences;

#[async_trait]
impl ReferenceCounter for NoReferences {
    async fn count_references(
        &self,
        _tx: &mut dyn StoreTx,
        _id: NodeId,
    ) -> Result<u64, HierarchyError> {
        Ok(0)
    }
}

/// Fixed reference counts, set by hand.
#[derive(Default)]
pub struct InMemoryReferences {
    counts: Mutex<HashMap<(EntityKind, NodeId), u64>>,
}

impl InMemoryReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: EntityKind, id: NodeId, count: u64) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if count == 0 {
            counts.remove(&(kind, id));
        } else {
            counts.insert((kind, id), count);
        }
    }
}

#[async_trait]
impl ReferenceCounter for InMemoryReferences {
    async fn count_references(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
    ) -> Result<u64, HierarchyError> {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(counts.get(&(tx.kind(), id)).copied().unwrap_or(0))
    }
}

/// Business-key check run inside the creating or updating transaction.
#[async_trait]
pub trait UniquenessPolicy: Send + Sync {
    /// `exclude` is the node being updated, `None` on create.
    async fn check(
        &self,
        tx: &mut dyn StoreTx,
        attributes: &serde_json::Value,
        exclude: Option<NodeId>,
    ) -> Result<(), HierarchyError>;
}

pub struct NoUniqueness;

#[async_trait]
impl UniquenessPolicy for NoUniqueness {
    async fn check(
        &self,
        _tx: &mut dyn StoreTx,
        _attributes: &serde_json::Value,
        _exclude: Option<NodeId>,
    ) -> Result<(), HierarchyError> {
        Ok(())
    }
}

/// A string attribute (e.g. `code`) unique across the live nodes of a kind.
pub struct UniqueAttribute {
    field: String,
}

impl UniqueAttribute {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl UniquenessPolicy for UniqueAttribute {
    async fn check(
        &self,
        tx: &mut dyn StoreTx,
        attributes: &serde_json::Value,
        exclude: Option<NodeId>,
    ) -> Result<(), HierarchyError> {
        let Some(value) = attributes.get(&self.field).and_then(|v| v.as_str()) else {
            return Ok(());
        };

        if tx.attribute_taken(&self.field, value, exclude).await? {
            return Err(HierarchyError::DuplicateKey {
                kind: tx.kind(),
                field: self.field.clone(),
                value: value.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeDraft, NodeStatus};
    use crate::services::memory::MemoryHierarchyStore;
    use crate::services::store::HierarchyStore;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn unique_attribute_ignores_self_and_deleted() {
        let store = MemoryHierarchyStore::new();
        let mut tx = store.begin(EntityKind::Department).await.unwrap();
        let existing = tx
            .insert(NodeDraft {
                parent_id: None,
                path: String::new(),
                level: 1,
                sort_order: 1,
                status: NodeStatus::Enabled,
                is_protected: false,
                attributes: json!({ "code": "HR", "name": "Human Resources" }),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let policy = UniqueAttribute::new("code");
        let err = policy
            .check(tx.as_mut(), &json!({ "code": "HR" }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::DuplicateKey { ref value, .. } if value == "HR"));

        policy
            .check(tx.as_mut(), &json!({ "code": "HR" }), Some(existing.id))
            .await
            .unwrap();
        policy
            .check(tx.as_mut(), &json!({ "name": "no code" }), None)
            .await
            .unwrap();

        let mut gone = existing.clone();
        gone.deleted = true;
        tx.save(&mut gone).await.unwrap();
        policy
            .check(tx.as_mut(), &json!({ "code": "HR" }), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn in_memory_references_are_per_kind() {
        let store = MemoryHierarchyStore::new();
        let refs = InMemoryReferences::new();
        refs.set(EntityKind::Department, 3, 2);

        let mut tx = store.begin(EntityKind::Department).await.unwrap();
        assert_eq!(refs.count_references(tx.as_mut(), 3).await.unwrap(), 2);
        refs.set(EntityKind::Department, 3, 0);
        assert_eq!(refs.count_references(tx.as_mut(), 3).await.unwrap(), 0);
        drop(tx);

        refs.set(EntityKind::Department, 3, 2);
        let mut tx = store.begin(EntityKind::Role).await.unwrap();
        assert_eq!(refs.count_references(tx.as_mut(), 3).await.unwrap(), 0);
    }
}
