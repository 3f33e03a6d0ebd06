//! Persistence seams for hierarchical nodes.
//!
//! `HierarchyStore` serves unlocked reads and opens transactions;
//! every structural mutation runs through a single `StoreTx` so that
//! checks and writes observe one snapshot and commit or abort together.

use async_trait::async_trait;

use super::error::HierarchyError;
use crate::models::{EntityKind, HierarchyNode, NodeDraft, NodeId};

#[async_trait]
pub trait HierarchyStore: Send + Sync {
    async fn begin(&self, kind: EntityKind) -> Result<Box<dyn StoreTx>, HierarchyError>;

    /// Row by id, deleted or not.
    async fn find_by_id(
        &self,
        kind: EntityKind,
        id: NodeId,
    ) -> Result<Option<HierarchyNode>, HierarchyError>;

    /// Rows for the given ids in no particular order; unknown ids are skipped.
    async fn find_by_ids(
        &self,
        kind: EntityKind,
        ids: &[NodeId],
    ) -> Result<Vec<HierarchyNode>, HierarchyError>;

    /// Live direct children in sibling order. `None` lists the roots.
    async fn find_children(
        &self,
        kind: EntityKind,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError>;

    /// Live nodes whose path lies under `prefix`, by level then sibling order.
    async fn find_descendants(
        &self,
        kind: EntityKind,
        prefix: &str,
    ) -> Result<Vec<HierarchyNode>, HierarchyError>;

    /// Every live node of the kind.
    async fn find_all(&self, kind: EntityKind) -> Result<Vec<HierarchyNode>, HierarchyError>;

    async fn health_check(&self) -> Result<(), HierarchyError>;
}

/// One open transaction against a single kind's table.
///
/// Dropping a transaction without calling `commit` discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    fn kind(&self) -> EntityKind;

    /// Reads and locks a row, deleted or not.
    async fn lock_node(&mut self, id: NodeId) -> Result<Option<HierarchyNode>, HierarchyError>;

    /// Serializes writers inserting into or reordering one sibling group.
    async fn lock_sibling_group(&mut self, parent_id: Option<NodeId>)
        -> Result<(), HierarchyError>;

    /// Live direct children in sibling order, locked.
    async fn children(
        &mut self,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError>;

    async fn max_sibling_sort_order(
        &mut self,
        parent_id: Option<NodeId>,
    ) -> Result<Option<i32>, HierarchyError>;

    /// Live sibling other than `exclude` holding `sort_order`.
    async fn sibling_with_sort_order(
        &mut self,
        parent_id: Option<NodeId>,
        sort_order: i32,
        exclude: NodeId,
    ) -> Result<Option<HierarchyNode>, HierarchyError>;

    /// Whether a live node other than `exclude` carries `value` in attribute `field`.
    async fn attribute_taken(
        &mut self,
        field: &str,
        value: &str,
        exclude: Option<NodeId>,
    ) -> Result<bool, HierarchyError>;

    /// Rows of another table whose `column` holds `id`, narrowed by `filter`
    /// when given. Runs on this transaction's connection and snapshot.
    async fn count_rows(
        &mut self,
        table: &str,
        column: &str,
        id: NodeId,
        filter: Option<&str>,
    ) -> Result<u64, HierarchyError>;

    async fn insert(&mut self, draft: NodeDraft) -> Result<HierarchyNode, HierarchyError>;

    /// Writes `node` if its stored version still equals `node.version`,
    /// then bumps `node.version`. A stale version is a concurrent modification.
    async fn save(&mut self, node: &mut HierarchyNode) -> Result<(), HierarchyError>;

    async fn commit(self: Box<Self>) -> Result<(), HierarchyError>;

    async fn rollback(self: Box<Self>) -> Result<(), HierarchyError>;
}
