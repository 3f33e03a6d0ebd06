//! Hierarchy manager: one generic component per entity kind.
//!
//! Every mutation runs in one store transaction, under the configured
//! timeout, and is retried a bounded number of times when it loses a
//! concurrency race. Cache invalidation and auditing happen only after
//! the transaction commits.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::audit::{AuditAction, AuditRecord, AuditSink, TracingAuditSink};
use super::cache::{CacheInvalidator, CacheKey, NoopCacheInvalidator};
use super::cascade::CascadeRewriter;
use super::cycle::{CycleGuard, ReparentDecision};
use super::deletion::{DeletionCheck, DeletionGuard};
use super::error::HierarchyError;
use super::metrics::{CASCADE_SIZE, MUTATIONS_TOTAL};
use super::path::PathCodec;
use super::policy::{NoReferences, NoUniqueness, ReferenceCounter, UniquenessPolicy};
use super::retry::{retry_on_conflict, RetryPolicy};
use super::store::{HierarchyStore, StoreTx};
use super::tree::TreeAssembler;
use crate::models::{
    normalize_parent, validate_attributes, AssembledTree, EntityKind, FlatTree, HierarchyNode,
    NewNode, NodeDraft, NodeId, NodeStatus, OperationContext, TreeStats,
};

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub retry: RetryPolicy,
    /// Applied to each attempt of a mutation and to each read.
    pub operation_timeout: Duration,
    /// Deepest tree `get_tree` will return nested; deeper ones need the flat view.
    pub max_tree_depth: usize,
}

pub const DEFAULT_MAX_TREE_DEPTH: usize = 512;

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            operation_timeout: Duration::from_secs(5),
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub node: HierarchyNode,
    /// False when the node already sat under the requested parent.
    pub moved: bool,
    pub descendants_rewritten: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReorderOutcome {
    pub node: HierarchyNode,
    /// Sibling that handed over the requested sort order.
    pub swapped_with: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub id: NodeId,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<NodeId>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum IntegrityProblem {
    MalformedPath { detail: String },
    SelfAncestor,
    MissingParent { parent_id: NodeId },
    PathMismatch { expected: String, actual: String },
    LevelMismatch { expected: i32, actual: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityIssue {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub problem: IntegrityProblem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

async fn finish<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, HierarchyError>,
) -> Result<T, HierarchyError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

fn not_found(kind: EntityKind, id: NodeId) -> HierarchyError {
    HierarchyError::NotFound { kind, id }
}

pub struct HierarchyManager {
    kind: EntityKind,
    store: Arc<dyn HierarchyStore>,
    references: Arc<dyn ReferenceCounter>,
    uniqueness: Arc<dyn UniquenessPolicy>,
    cache: Arc<dyn CacheInvalidator>,
    audit: Arc<dyn AuditSink>,
    settings: ManagerSettings,
}

impl HierarchyManager {
    pub fn new(kind: EntityKind, store: Arc<dyn HierarchyStore>) -> Self {
        Self {
            kind,
            store,
            references: Arc::new(NoReferences),
            uniqueness: Arc::new(NoUniqueness),
            cache: Arc::new(NoopCacheInvalidator),
            audit: Arc::new(TracingAuditSink),
            settings: ManagerSettings::default(),
        }
    }

    pub fn with_references(mut self, references: Arc<dyn ReferenceCounter>) -> Self {
        self.references = references;
        self
    }

    pub fn with_uniqueness(mut self, uniqueness: Arc<dyn UniquenessPolicy>) -> Self {
        self.uniqueness = uniqueness;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    fn timeout_ms(&self) -> u64 {
        self.settings.operation_timeout.as_millis() as u64
    }

    async fn with_timeout<T, Fut>(
        &self,
        operation: &'static str,
        fut: Fut,
    ) -> Result<T, HierarchyError>
    where
        Fut: Future<Output = Result<T, HierarchyError>>,
    {
        tokio::time::timeout(self.settings.operation_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(HierarchyError::Timeout {
                    operation,
                    timeout_ms: self.timeout_ms(),
                })
            })
    }

    fn log_integrity<T>(&self, operation: &'static str, result: &Result<T, HierarchyError>) {
        if let Err(HierarchyError::DataIntegrity { node_id, detail }) = result {
            error!(
                kind = %self.kind,
                operation,
                node_id = ?node_id,
                detail = %detail,
                "Hierarchy data integrity violation"
            );
        }
    }

    /// Runs a mutation with timeout and bounded conflict retry, then records the outcome.
    async fn mutate<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, HierarchyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HierarchyError>>,
    {
        let result = retry_on_conflict(&self.settings.retry, operation, || {
            self.with_timeout(operation, f())
        })
        .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.reason(),
        };
        MUTATIONS_TOTAL
            .with_label_values(&[self.kind.as_str(), operation, outcome])
            .inc();
        self.log_integrity(operation, &result);
        result
    }

    async fn read<T, Fut>(&self, operation: &'static str, fut: Fut) -> Result<T, HierarchyError>
    where
        Fut: Future<Output = Result<T, HierarchyError>>,
    {
        let result = self.with_timeout(operation, fut).await;
        self.log_integrity(operation, &result);
        result
    }

    /// Exactly one invalidation and one audit record per committed mutation.
    async fn after_commit(
        &self,
        action: AuditAction,
        node_id: NodeId,
        key: CacheKey,
        ctx: &OperationContext,
        details: serde_json::Value,
    ) {
        match tokio::time::timeout(self.settings.operation_timeout, self.cache.invalidate(key))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(cache_key = %key, error = %e, "Cache invalidation failed"),
            Err(_) => warn!(cache_key = %key, "Cache invalidation timed out"),
        }
        self.audit
            .record(AuditRecord::new(self.kind, action, node_id, ctx, details));
    }

    async fn lock_live(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
    ) -> Result<HierarchyNode, HierarchyError> {
        match tx.lock_node(id).await? {
            Some(node) if node.is_live() => Ok(node),
            _ => Err(not_found(self.kind, id)),
        }
    }

    async fn next_sort_order(
        &self,
        tx: &mut dyn StoreTx,
        parent_id: Option<NodeId>,
    ) -> Result<i32, HierarchyError> {
        Ok(tx.max_sibling_sort_order(parent_id).await?.map_or(1, |max| max + 1))
    }

    // ---- mutations -------------------------------------------------------

    /// Creates a node under `new.parent_id` (root when absent or 0).
    #[instrument(skip(self, new, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id))]
    pub async fn create(
        &self,
        new: NewNode,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        validate_attributes(self.kind, &new.attributes).map_err(HierarchyError::Validation)?;
        let parent_id = normalize_parent(new.parent_id);

        let node = self
            .mutate("create", || async {
                let mut tx = self.store.begin(self.kind).await?;
                let result = self.create_in(tx.as_mut(), parent_id, &new, ctx).await;
                finish(tx, result).await
            })
            .await?;

        info!(node_id = node.id, parent_id = ?node.parent_id, level = node.level, "Created hierarchy node");
        self.after_commit(
            AuditAction::Create,
            node.id,
            CacheKey::node(self.kind, node.id),
            ctx,
            serde_json::json!({ "parent_id": node.parent_id }),
        )
        .await;
        Ok(node)
    }

    async fn create_in(
        &self,
        tx: &mut dyn StoreTx,
        parent_id: Option<NodeId>,
        new: &NewNode,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        let parent = match parent_id {
            Some(pid) => match tx.lock_node(pid).await? {
                Some(p) if p.is_live() && p.is_enabled() => Some(p),
                _ => {
                    return Err(HierarchyError::ParentNotFound {
                        kind: self.kind,
                        parent_id: pid,
                    })
                }
            },
            None => None,
        };

        tx.lock_sibling_group(parent_id).await?;
        self.uniqueness.check(tx, &new.attributes, None).await?;
        let sort_order = self.next_sort_order(tx, parent_id).await?;

        tx.insert(NodeDraft {
            parent_id,
            path: PathCodec::compute_path(parent.as_ref()),
            level: PathCodec::compute_level(parent.as_ref()),
            sort_order,
            status: new.status,
            is_protected: new.is_protected,
            attributes: new.attributes.clone(),
            created_at: ctx.at,
        })
        .await
    }

    /// Re-parents `id` under `new_parent_id` (root when absent or 0) and
    /// rewrites its whole subtree in the same transaction.
    #[instrument(skip(self, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id))]
    pub async fn move_node(
        &self,
        id: NodeId,
        new_parent_id: Option<NodeId>,
        ctx: &OperationContext,
    ) -> Result<MoveOutcome, HierarchyError> {
        let new_parent_id = normalize_parent(new_parent_id);

        let (outcome, old_parent) = self
            .mutate("move", || async {
                let mut tx = self.store.begin(self.kind).await?;
                let result = self.move_in(tx.as_mut(), id, new_parent_id, ctx).await;
                finish(tx, result).await
            })
            .await?;

        if outcome.moved {
            CASCADE_SIZE
                .with_label_values(&[self.kind.as_str()])
                .observe(outcome.descendants_rewritten as f64);
            info!(
                node_id = id,
                from = ?old_parent,
                to = ?new_parent_id,
                descendants_rewritten = outcome.descendants_rewritten,
                "Moved hierarchy node"
            );
            self.after_commit(
                AuditAction::Move,
                id,
                CacheKey::all(self.kind),
                ctx,
                serde_json::json!({
                    "from": old_parent,
                    "to": new_parent_id,
                    "descendants_rewritten": outcome.descendants_rewritten,
                }),
            )
            .await;
        }
        Ok(outcome)
    }

    async fn move_in(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
        new_parent_id: Option<NodeId>,
        ctx: &OperationContext,
    ) -> Result<(MoveOutcome, Option<NodeId>), HierarchyError> {
        let mut node = self.lock_live(tx, id).await?;
        if node.is_protected {
            return Err(HierarchyError::Protected {
                kind: self.kind,
                id,
            });
        }

        let candidate = match new_parent_id {
            Some(pid) => Some(self.lock_live(tx, pid).await?),
            None => None,
        };

        let old_parent = node.parent_id;
        if CycleGuard::validate_reparent(self.kind, &node, candidate.as_ref())?
            == ReparentDecision::Unchanged
        {
            let outcome = MoveOutcome {
                node,
                moved: false,
                descendants_rewritten: 0,
            };
            return Ok((outcome, old_parent));
        }

        if let Some(parent) = &candidate {
            if !parent.is_enabled() {
                return Err(HierarchyError::ParentNotFound {
                    kind: self.kind,
                    parent_id: parent.id,
                });
            }
        }

        tx.lock_sibling_group(new_parent_id).await?;
        let sort_order = self.next_sort_order(tx, new_parent_id).await?;

        let old_path = node.path.clone();
        node.parent_id = new_parent_id;
        node.path = PathCodec::compute_path(candidate.as_ref());
        node.level = PathCodec::compute_level(candidate.as_ref());
        node.sort_order = sort_order;
        node.updated_at = ctx.at;
        tx.save(&mut node).await?;

        let rewritten = CascadeRewriter::rewrite_subtree(tx, &node, &old_path, ctx.at).await?;
        let outcome = MoveOutcome {
            node,
            moved: true,
            descendants_rewritten: rewritten,
        };
        Ok((outcome, old_parent))
    }

    /// Soft-deletes a leaf that nothing references.
    #[instrument(skip(self, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id))]
    pub async fn delete(
        &self,
        id: NodeId,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        let node = self
            .mutate("delete", || async {
                let mut tx = self.store.begin(self.kind).await?;
                let result = self.delete_in(tx.as_mut(), id, ctx).await;
                finish(tx, result).await
            })
            .await?;

        info!(node_id = id, "Deleted hierarchy node");
        self.after_commit(
            AuditAction::Delete,
            id,
            CacheKey::node(self.kind, id),
            ctx,
            serde_json::json!({ "parent_id": node.parent_id }),
        )
        .await;
        Ok(node)
    }

    async fn delete_in(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        let mut node = self.lock_live(tx, id).await?;

        let check = DeletionGuard::evaluate(tx, self.references.as_ref(), &node).await?;
        if let Some(err) = check.into_error() {
            warn!(node_id = id, reason = err.reason(), "Deletion blocked");
            return Err(err);
        }

        node.deleted = true;
        node.deleted_by = Some(ctx.actor_id);
        node.deleted_at = Some(ctx.at);
        node.updated_at = ctx.at;
        tx.save(&mut node).await?;
        Ok(node)
    }

    /// Brings a soft-deleted node back under its recorded parent.
    #[instrument(skip(self, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id))]
    pub async fn restore(
        &self,
        id: NodeId,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        let (node, restored) = self
            .mutate("restore", || async {
                let mut tx = self.store.begin(self.kind).await?;
                let result = self.restore_in(tx.as_mut(), id, ctx).await;
                finish(tx, result).await
            })
            .await?;

        if restored {
            info!(node_id = id, path = %node.path, "Restored hierarchy node");
            self.after_commit(
                AuditAction::Restore,
                id,
                CacheKey::node(self.kind, id),
                ctx,
                serde_json::json!({ "parent_id": node.parent_id, "sort_order": node.sort_order }),
            )
            .await;
        }
        Ok(node)
    }

    async fn restore_in(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
        ctx: &OperationContext,
    ) -> Result<(HierarchyNode, bool), HierarchyError> {
        let mut node = tx
            .lock_node(id)
            .await?
            .ok_or_else(|| not_found(self.kind, id))?;
        if node.is_live() {
            return Ok((node, false));
        }

        let parent = match node.parent_id {
            Some(pid) => match tx.lock_node(pid).await? {
                Some(p) if p.is_live() => Some(p),
                _ => {
                    return Err(HierarchyError::ParentNotFound {
                        kind: self.kind,
                        parent_id: pid,
                    })
                }
            },
            None => None,
        };

        tx.lock_sibling_group(node.parent_id).await?;
        self.uniqueness.check(tx, &node.attributes, Some(id)).await?;
        if tx
            .sibling_with_sort_order(node.parent_id, node.sort_order, id)
            .await?
            .is_some()
        {
            node.sort_order = self.next_sort_order(tx, node.parent_id).await?;
        }

        node.path = PathCodec::compute_path(parent.as_ref());
        node.level = PathCodec::compute_level(parent.as_ref());
        node.deleted = false;
        node.deleted_by = None;
        node.deleted_at = None;
        node.updated_at = ctx.at;
        tx.save(&mut node).await?;
        Ok((node, true))
    }

    /// Enables or disables a node. Never cascades.
    #[instrument(skip(self, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id))]
    pub async fn set_status(
        &self,
        id: NodeId,
        status: NodeStatus,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        let (node, changed) = self
            .mutate("set_status", || async {
                let mut tx = self.store.begin(self.kind).await?;
                let result = self.set_status_in(tx.as_mut(), id, status, ctx).await;
                finish(tx, result).await
            })
            .await?;

        if changed {
            info!(node_id = id, status = status.as_str(), "Changed hierarchy node status");
            self.after_commit(
                AuditAction::SetStatus,
                id,
                CacheKey::node(self.kind, id),
                ctx,
                serde_json::json!({ "status": status }),
            )
            .await;
        }
        Ok(node)
    }

    async fn set_status_in(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
        status: NodeStatus,
        ctx: &OperationContext,
    ) -> Result<(HierarchyNode, bool), HierarchyError> {
        let mut node = self.lock_live(tx, id).await?;
        if node.is_protected {
            return Err(HierarchyError::Protected {
                kind: self.kind,
                id,
            });
        }
        if node.status == status {
            return Ok((node, false));
        }
        node.status = status;
        node.updated_at = ctx.at;
        tx.save(&mut node).await?;
        Ok((node, true))
    }

    /// Gives `id` the requested sort order, swapping with the sibling that holds it.
    #[instrument(skip(self, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id))]
    pub async fn reorder(
        &self,
        id: NodeId,
        sort_order: i32,
        ctx: &OperationContext,
    ) -> Result<ReorderOutcome, HierarchyError> {
        let (outcome, changed) = self
            .mutate("reorder", || async {
                let mut tx = self.store.begin(self.kind).await?;
                let result = self.reorder_in(tx.as_mut(), id, sort_order, ctx).await;
                finish(tx, result).await
            })
            .await?;

        if changed {
            info!(node_id = id, sort_order, swapped_with = ?outcome.swapped_with, "Reordered hierarchy node");
            self.after_commit(
                AuditAction::Reorder,
                id,
                CacheKey::node(self.kind, id),
                ctx,
                serde_json::json!({ "sort_order": sort_order, "swapped_with": outcome.swapped_with }),
            )
            .await;
        }
        Ok(outcome)
    }

    async fn reorder_in(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
        sort_order: i32,
        ctx: &OperationContext,
    ) -> Result<(ReorderOutcome, bool), HierarchyError> {
        let mut node = self.lock_live(tx, id).await?;
        if node.is_protected {
            return Err(HierarchyError::Protected {
                kind: self.kind,
                id,
            });
        }
        if node.sort_order == sort_order {
            let outcome = ReorderOutcome {
                node,
                swapped_with: None,
            };
            return Ok((outcome, false));
        }

        tx.lock_sibling_group(node.parent_id).await?;
        let holder = tx
            .sibling_with_sort_order(node.parent_id, sort_order, id)
            .await?;
        let swapped_with = match holder {
            Some(mut sibling) => {
                sibling.sort_order = node.sort_order;
                sibling.updated_at = ctx.at;
                tx.save(&mut sibling).await?;
                Some(sibling.id)
            }
            None => None,
        };

        node.sort_order = sort_order;
        node.updated_at = ctx.at;
        tx.save(&mut node).await?;
        Ok((ReorderOutcome { node, swapped_with }, true))
    }

    /// Replaces the opaque domain attributes of a node.
    #[instrument(skip(self, attributes, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id))]
    pub async fn update_attributes(
        &self,
        id: NodeId,
        attributes: serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        validate_attributes(self.kind, &attributes).map_err(HierarchyError::Validation)?;

        let node = self
            .mutate("update_attributes", || async {
                let mut tx = self.store.begin(self.kind).await?;
                let result = self.update_attributes_in(tx.as_mut(), id, &attributes, ctx).await;
                finish(tx, result).await
            })
            .await?;

        info!(node_id = id, "Updated hierarchy node attributes");
        self.after_commit(
            AuditAction::UpdateAttributes,
            id,
            CacheKey::node(self.kind, id),
            ctx,
            serde_json::Value::Null,
        )
        .await;
        Ok(node)
    }

    async fn update_attributes_in(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
        attributes: &serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<HierarchyNode, HierarchyError> {
        let mut node = self.lock_live(tx, id).await?;
        if node.is_protected {
            return Err(HierarchyError::Protected {
                kind: self.kind,
                id,
            });
        }
        self.uniqueness.check(tx, attributes, Some(id)).await?;

        node.attributes = attributes.clone();
        node.updated_at = ctx.at;
        tx.save(&mut node).await?;
        Ok(node)
    }

    /// Deletes each id independently, deepest first, collecting per-id failures.
    #[instrument(skip(self, ids, ctx), fields(kind = %self.kind, actor_id = ctx.actor_id, count = ids.len()))]
    pub async fn batch_delete(
        &self,
        ids: &[NodeId],
        ctx: &OperationContext,
    ) -> Result<BatchDeleteOutcome, HierarchyError> {
        let mut seen = HashSet::new();
        let unique: Vec<NodeId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let levels: HashMap<NodeId, i32> = self
            .read("batch_delete", self.store.find_by_ids(self.kind, &unique))
            .await?
            .into_iter()
            .map(|n| (n.id, n.level))
            .collect();
        let mut ordered = unique;
        ordered.sort_by_key(|id| std::cmp::Reverse(levels.get(id).copied().unwrap_or(i32::MIN)));

        let mut outcome = BatchDeleteOutcome::default();
        for id in ordered {
            match self.delete(id, ctx).await {
                Ok(_) => outcome.deleted.push(id),
                Err(err) => outcome.failed.push(BatchFailure {
                    id,
                    reason: err.reason(),
                    message: err.to_string(),
                }),
            }
        }

        info!(
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            "Batch delete finished"
        );
        Ok(outcome)
    }

    // ---- reads -----------------------------------------------------------

    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn get_by_id(&self, id: NodeId) -> Result<HierarchyNode, HierarchyError> {
        self.read("get_by_id", async {
            match self.store.find_by_id(self.kind, id).await? {
                Some(node) if node.is_live() => Ok(node),
                _ => Err(not_found(self.kind, id)),
            }
        })
        .await
    }

    /// Direct children in sibling order; `None` lists the roots.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn get_children(
        &self,
        id: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let parent = normalize_parent(id);
        if let Some(pid) = parent {
            self.get_by_id(pid).await?;
        }
        self.read("get_children", self.store.find_children(self.kind, parent))
            .await
    }

    /// Ancestors root first, excluding the node itself.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn get_ancestors(&self, id: NodeId) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let node = self.get_by_id(id).await?;
        self.read("get_ancestors", async {
            let chain = PathCodec::ancestors_of(&node)?;
            if chain.contains(&node.id) {
                return Err(HierarchyError::integrity(
                    Some(node.id),
                    format!("node {} lists itself among its ancestors", node.id),
                ));
            }

            let mut by_id: HashMap<NodeId, HierarchyNode> = self
                .store
                .find_by_ids(self.kind, &chain)
                .await?
                .into_iter()
                .map(|n| (n.id, n))
                .collect();

            chain
                .iter()
                .map(|ancestor| match by_id.remove(ancestor) {
                    Some(a) if a.is_live() => Ok(a),
                    _ => Err(HierarchyError::integrity(
                        Some(node.id),
                        format!(
                            "ancestor {} of node {} is missing or deleted",
                            ancestor, node.id
                        ),
                    )),
                })
                .collect()
        })
        .await
    }

    /// Every live descendant, breadth-first: by level, then sibling order.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn get_descendants(&self, id: NodeId) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let node = self.get_by_id(id).await?;
        let prefix = PathCodec::child_prefix(&node);
        self.read(
            "get_descendants",
            self.store.find_descendants(self.kind, &prefix),
        )
        .await
    }

    /// Nested tree below `root` (or the whole forest), optionally enabled nodes only.
    ///
    /// Fails with `TreeTooDeep` past `max_tree_depth` levels.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn get_tree(
        &self,
        root: Option<NodeId>,
        enabled_only: bool,
    ) -> Result<AssembledTree, HierarchyError> {
        let tree = self.assemble(root, enabled_only).await?;
        let depth = tree.max_depth();
        if depth > self.settings.max_tree_depth {
            warn!(depth, limit = self.settings.max_tree_depth, "Refusing nested tree view");
            return Err(HierarchyError::TreeTooDeep {
                kind: self.kind,
                depth,
                limit: self.settings.max_tree_depth,
            });
        }
        Ok(tree)
    }

    /// Same selection as `get_tree`, as a pre-order listing with depths.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn get_flat_tree(
        &self,
        root: Option<NodeId>,
        enabled_only: bool,
    ) -> Result<FlatTree, HierarchyError> {
        Ok(self.assemble(root, enabled_only).await?.flatten())
    }

    async fn assemble(
        &self,
        root: Option<NodeId>,
        enabled_only: bool,
    ) -> Result<AssembledTree, HierarchyError> {
        let root = normalize_parent(root);
        let nodes = match root {
            Some(id) => {
                let node = self.get_by_id(id).await?;
                let prefix = PathCodec::child_prefix(&node);
                self.read("get_tree", self.store.find_descendants(self.kind, &prefix))
                    .await?
            }
            None => self.read("get_tree", self.store.find_all(self.kind)).await?,
        };

        let nodes = if enabled_only {
            TreeAssembler::flatten_enabled_only(nodes)
        } else {
            nodes
        };
        Ok(TreeAssembler::build_tree(nodes, root))
    }

    /// Every reason `id` could not be deleted right now.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn check_deletion(&self, id: NodeId) -> Result<DeletionCheck, HierarchyError> {
        self.read("check_deletion", async {
            let mut tx = self.store.begin(self.kind).await?;
            let result = async {
                let node = self.lock_live(tx.as_mut(), id).await?;
                DeletionGuard::evaluate(tx.as_mut(), self.references.as_ref(), &node).await
            }
            .await;
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback failed");
            }
            result
        })
        .await
    }

    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn stats(&self) -> Result<TreeStats, HierarchyError> {
        let nodes = self.read("stats", self.store.find_all(self.kind)).await?;
        Ok(TreeAssembler::build_tree(nodes, None).stats())
    }

    /// Scans the live table for structural inconsistencies. Never repairs.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, HierarchyError> {
        let nodes = self
            .read("verify_integrity", self.store.find_all(self.kind))
            .await?;
        let by_id: HashMap<NodeId, &HierarchyNode> = nodes.iter().map(|n| (n.id, n)).collect();

        let mut report = IntegrityReport {
            checked: nodes.len(),
            issues: Vec::new(),
        };
        for node in &nodes {
            if let Some(problem) = Self::inspect(node, &by_id) {
                report.issues.push(IntegrityIssue {
                    node_id: node.id,
                    problem,
                });
            }
        }

        if !report.is_consistent() {
            error!(
                kind = %self.kind,
                issues = report.issues.len(),
                "Hierarchy integrity check found inconsistencies"
            );
        }
        Ok(report)
    }

    fn inspect(
        node: &HierarchyNode,
        by_id: &HashMap<NodeId, &HierarchyNode>,
    ) -> Option<IntegrityProblem> {
        let chain = match PathCodec::decode_ancestor_ids(&node.path) {
            Ok(chain) => chain,
            Err(e) => {
                return Some(IntegrityProblem::MalformedPath {
                    detail: e.to_string(),
                })
            }
        };
        if chain.contains(&node.id) {
            return Some(IntegrityProblem::SelfAncestor);
        }

        let expected_path = match node.parent_id {
            None => String::new(),
            Some(pid) => match by_id.get(&pid) {
                Some(parent) => PathCodec::child_prefix(parent),
                None => return Some(IntegrityProblem::MissingParent { parent_id: pid }),
            },
        };
        if node.path != expected_path {
            return Some(IntegrityProblem::PathMismatch {
                expected: expected_path,
                actual: node.path.clone(),
            });
        }

        let expected_level = PathCodec::compute_level(None) + chain.len() as i32;
        if node.level != expected_level {
            return Some(IntegrityProblem::LevelMismatch {
                expected: expected_level,
                actual: node.level,
            });
        }
        None
    }

    pub async fn health_check(&self) -> Result<(), HierarchyError> {
        self.read("health_check", self.store.health_check()).await
    }
}

/// Managers keyed by entity kind.
#[derive(Clone, Default)]
pub struct Hierarchies {
    managers: HashMap<EntityKind, Arc<HierarchyManager>>,
}

impl Hierarchies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, manager: HierarchyManager) -> Self {
        self.managers.insert(manager.kind(), Arc::new(manager));
        self
    }

    pub fn get(&self, kind: EntityKind) -> Option<Arc<HierarchyManager>> {
        self.managers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<EntityKind> = self.managers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
