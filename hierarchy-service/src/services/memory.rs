//! In-process store used by tests and embedded deployments.
//!
//! A transaction holds the state's write lock for its whole lifetime and
//! edits a private copy of one kind's table; commit swaps the copy in,
//! drop throws it away. Readers therefore only ever see committed tables.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::error::HierarchyError;
use super::path::PathCodec;
use super::store::{HierarchyStore, StoreTx};
use crate::models::{EntityKind, HierarchyNode, NodeDraft, NodeId};

#[derive(Debug, Clone, Default)]
struct KindTable {
    rows: BTreeMap<NodeId, HierarchyNode>,
    last_id: NodeId,
}

impl KindTable {
    fn live(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.rows.values().filter(|n| n.is_live())
    }

    fn children(&self, parent_id: Option<NodeId>) -> Vec<HierarchyNode> {
        let mut out: Vec<HierarchyNode> = self
            .live()
            .filter(|n| n.parent_id == parent_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sibling_cmp(b));
        out
    }

    fn descendants(&self, prefix: &str) -> Vec<HierarchyNode> {
        let mut out: Vec<HierarchyNode> = self
            .live()
            .filter(|n| PathCodec::is_within(&n.path, prefix))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.sibling_cmp(b)));
        out
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<EntityKind, KindTable>,
    /// Live referencing rows by (table, column, referenced id).
    referencing: HashMap<(String, String, NodeId), u64>,
}

impl MemoryState {
    fn table(&self, kind: EntityKind) -> KindTable {
        self.tables.get(&kind).cloned().unwrap_or_default()
    }
}

/// Failures injected into upcoming transactions.
#[derive(Debug, Default)]
struct FaultPlan {
    fail_after_saves: Option<usize>,
    conflicts: usize,
    stall: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryHierarchyStore {
    state: Arc<RwLock<MemoryState>>,
    faults: Arc<Mutex<FaultPlan>>,
}

fn plan(faults: &Mutex<FaultPlan>) -> MutexGuard<'_, FaultPlan> {
    faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryHierarchyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next transaction's save fail once `saves` saves have succeeded in it.
    pub fn fail_after_saves(&self, saves: usize) {
        plan(&self.faults).fail_after_saves = Some(saves);
    }

    /// Makes the next `count` commits lose a simulated race.
    pub fn force_conflicts(&self, count: usize) {
        plan(&self.faults).conflicts = count;
    }

    /// Delays the next `begin` by `delay`.
    pub fn stall_next_begin(&self, delay: Duration) {
        plan(&self.faults).stall = Some(delay);
    }

    /// Writes a row as-is, bypassing every check. For seeding and corruption tests.
    pub async fn put_raw(&self, kind: EntityKind, node: HierarchyNode) {
        let mut state = self.state.write().await;
        let table = state.tables.entry(kind).or_default();
        table.last_id = table.last_id.max(node.id);
        table.rows.insert(node.id, node);
    }

    /// Records `count` live rows of `table` pointing at `id` through `column`.
    pub async fn put_referencing_rows(&self, table: &str, column: &str, id: NodeId, count: u64) {
        let mut state = self.state.write().await;
        let key = (table.to_string(), column.to_string(), id);
        if count == 0 {
            state.referencing.remove(&key);
        } else {
            state.referencing.insert(key, count);
        }
    }

    /// Every row of the kind including deleted ones, by id.
    pub async fn snapshot(&self, kind: EntityKind) -> Vec<HierarchyNode> {
        let state = self.state.read().await;
        state
            .tables
            .get(&kind)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HierarchyStore for MemoryHierarchyStore {
    async fn begin(&self, kind: EntityKind) -> Result<Box<dyn StoreTx>, HierarchyError> {
        let stall = plan(&self.faults).stall.take();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let guard = self.state.clone().write_owned().await;
        let working = guard.table(kind);
        Ok(Box::new(MemoryTx {
            kind,
            guard,
            working,
            saves: 0,
            faults: self.faults.clone(),
        }))
    }

    async fn find_by_id(
        &self,
        kind: EntityKind,
        id: NodeId,
    ) -> Result<Option<HierarchyNode>, HierarchyError> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(&kind)
            .and_then(|t| t.rows.get(&id).cloned()))
    }

    async fn find_by_ids(
        &self,
        kind: EntityKind,
        ids: &[NodeId],
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let state = self.state.read().await;
        let Some(table) = state.tables.get(&kind) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| table.rows.get(id).cloned())
            .collect())
    }

    async fn find_children(
        &self,
        kind: EntityKind,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let state = self.state.read().await;
        Ok(state.table(kind).children(parent_id))
    }

    async fn find_descendants(
        &self,
        kind: EntityKind,
        prefix: &str,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(&kind)
            .map(|t| t.descendants(prefix))
            .unwrap_or_default())
    }

    async fn find_all(&self, kind: EntityKind) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(&kind)
            .map(|t| t.live().cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), HierarchyError> {
        Ok(())
    }
}

pub struct MemoryTx {
    kind: EntityKind,
    guard: OwnedRwLockWriteGuard<MemoryState>,
    working: KindTable,
    saves: usize,
    faults: Arc<Mutex<FaultPlan>>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn lock_node(&mut self, id: NodeId) -> Result<Option<HierarchyNode>, HierarchyError> {
        Ok(self.working.rows.get(&id).cloned())
    }

    // The whole state is already exclusively held.
    async fn lock_sibling_group(
        &mut self,
        _parent_id: Option<NodeId>,
    ) -> Result<(), HierarchyError> {
        Ok(())
    }

    async fn children(
        &mut self,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        Ok(self.working.children(parent_id))
    }

    async fn max_sibling_sort_order(
        &mut self,
        parent_id: Option<NodeId>,
    ) -> Result<Option<i32>, HierarchyError> {
        Ok(self
            .working
            .live()
            .filter(|n| n.parent_id == parent_id)
            .map(|n| n.sort_order)
            .max())
    }

    async fn sibling_with_sort_order(
        &mut self,
        parent_id: Option<NodeId>,
        sort_order: i32,
        exclude: NodeId,
    ) -> Result<Option<HierarchyNode>, HierarchyError> {
        Ok(self
            .working
            .live()
            .find(|n| n.parent_id == parent_id && n.sort_order == sort_order && n.id != exclude)
            .cloned())
    }

    async fn attribute_taken(
        &mut self,
        field: &str,
        value: &str,
        exclude: Option<NodeId>,
    ) -> Result<bool, HierarchyError> {
        Ok(self
            .working
            .live()
            .any(|n| Some(n.id) != exclude && n.attribute_str(field) == Some(value)))
    }

    // Only live rows are recorded, so `filter` has nothing left to narrow.
    async fn count_rows(
        &mut self,
        table: &str,
        column: &str,
        id: NodeId,
        _filter: Option<&str>,
    ) -> Result<u64, HierarchyError> {
        let key = (table.to_string(), column.to_string(), id);
        Ok(self.guard.referencing.get(&key).copied().unwrap_or(0))
    }

    async fn insert(&mut self, draft: NodeDraft) -> Result<HierarchyNode, HierarchyError> {
        self.working.last_id += 1;
        let node = HierarchyNode {
            id: self.working.last_id,
            parent_id: draft.parent_id,
            path: draft.path,
            level: draft.level,
            sort_order: draft.sort_order,
            status: draft.status,
            is_protected: draft.is_protected,
            deleted: false,
            deleted_by: None,
            deleted_at: None,
            created_at: draft.created_at,
            updated_at: draft.created_at,
            version: 1,
            attributes: draft.attributes,
        };
        self.working.rows.insert(node.id, node.clone());
        Ok(node)
    }

    async fn save(&mut self, node: &mut HierarchyNode) -> Result<(), HierarchyError> {
        {
            let mut faults = plan(&self.faults);
            if faults.fail_after_saves.is_some_and(|limit| self.saves >= limit) {
                faults.fail_after_saves = None;
                return Err(HierarchyError::Store(anyhow::anyhow!(
                    "injected failure after {} saves",
                    self.saves
                )));
            }
        }

        let stored = self.working.rows.get(&node.id).ok_or_else(|| {
            HierarchyError::ConcurrentModification(format!("node {} vanished", node.id))
        })?;
        if stored.version != node.version {
            return Err(HierarchyError::ConcurrentModification(format!(
                "node {} is at version {}, expected {}",
                node.id, stored.version, node.version
            )));
        }

        node.version += 1;
        self.working.rows.insert(node.id, node.clone());
        self.saves += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), HierarchyError> {
        let mut this = *self;
        {
            let mut faults = plan(&this.faults);
            if faults.conflicts > 0 {
                faults.conflicts -= 1;
                return Err(HierarchyError::ConcurrentModification(
                    "injected commit conflict".to_string(),
                ));
            }
        }
        this.guard.tables.insert(this.kind, this.working);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), HierarchyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeStatus;
    use chrono::Utc;

    const KIND: EntityKind = EntityKind::Category;

    fn draft(parent_id: Option<NodeId>, path: &str, sort_order: i32) -> NodeDraft {
        NodeDraft {
            parent_id,
            path: path.to_string(),
            level: PathCodec::level_of(path).unwrap(),
            sort_order,
            status: NodeStatus::Enabled,
            is_protected: false,
            attributes: serde_json::json!({ "code": format!("C{}", sort_order) }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = MemoryHierarchyStore::new();
        {
            let mut tx = store.begin(KIND).await.unwrap();
            tx.insert(draft(None, "", 1)).await.unwrap();
        }
        assert!(store.find_all(KIND).await.unwrap().is_empty());

        let mut tx = store.begin(KIND).await.unwrap();
        let root = tx.insert(draft(None, "", 1)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.find_all(KIND).await.unwrap(), vec![root]);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = MemoryHierarchyStore::new();
        let mut tx = store.begin(KIND).await.unwrap();
        let mut node = tx.insert(draft(None, "", 1)).await.unwrap();
        let mut stale = node.clone();
        tx.save(&mut node).await.unwrap();
        assert_eq!(node.version, 2);

        let err = tx.save(&mut stale).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn kinds_have_independent_tables() {
        let store = MemoryHierarchyStore::new();
        let mut tx = store.begin(KIND).await.unwrap();
        tx.insert(draft(None, "", 1)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.find_all(EntityKind::Role).await.unwrap().is_empty());
        assert!(store.find_by_id(EntityKind::Role, 1).await.unwrap().is_none());
        assert!(store.find_by_id(KIND, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn descendants_are_level_ordered_and_boundary_safe() {
        let store = MemoryHierarchyStore::new();
        let mut tx = store.begin(KIND).await.unwrap();
        let a = tx.insert(draft(None, "", 1)).await.unwrap();
        let b = tx.insert(draft(Some(a.id), "/1", 1)).await.unwrap();
        let c = tx.insert(draft(Some(b.id), "/1/2", 1)).await.unwrap();
        let d = tx.insert(draft(Some(a.id), "/1", 2)).await.unwrap();
        tx.commit().await.unwrap();

        let ids: Vec<NodeId> = store
            .find_descendants(KIND, "/1")
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![b.id, d.id, c.id]);
    }

    #[tokio::test]
    async fn injected_commit_conflict_rolls_back() {
        let store = MemoryHierarchyStore::new();
        store.force_conflicts(1);

        let mut tx = store.begin(KIND).await.unwrap();
        tx.insert(draft(None, "", 1)).await.unwrap();
        assert!(tx.commit().await.unwrap_err().is_retryable());
        assert!(store.snapshot(KIND).await.is_empty());
    }
}
