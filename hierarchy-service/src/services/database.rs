//! PostgreSQL-backed hierarchy store and reference counter.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::instrument;

use super::error::HierarchyError;
use super::metrics::DB_QUERY_DURATION;
use super::policy::ReferenceCounter;
use super::store::{HierarchyStore, StoreTx};
use crate::models::{EntityKind, HierarchyNode, NodeDraft, NodeId};

const NODE_COLUMNS: &str = "id, parent_id, path, level, sort_order, status, is_protected, \
     deleted, deleted_by, deleted_at, created_at, updated_at, version, attributes";

const SIBLING_ORDER: &str = "sort_order, created_at, id";

/// Advisory lock key space used for business-key checks, offset from the
/// per-kind sibling-group namespaces.
const UNIQUENESS_LOCK_OFFSET: i32 = 100;

#[derive(Clone)]
pub struct PgHierarchyStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgHierarchyStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HierarchyStore for PgHierarchyStore {
    #[instrument(skip(self))]
    async fn begin(&self, kind: EntityKind) -> Result<Box<dyn StoreTx>, HierarchyError> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgStoreTx { kind, tx }))
    }

    #[instrument(skip(self))]
    async fn find_by_id(
        &self,
        kind: EntityKind,
        id: NodeId,
    ) -> Result<Option<HierarchyNode>, HierarchyError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_id"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            NODE_COLUMNS,
            kind.table_name()
        );
        let node = sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(node)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn find_by_ids(
        &self,
        kind: EntityKind,
        ids: &[NodeId],
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_ids"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM {} WHERE id = ANY($1)",
            NODE_COLUMNS,
            kind.table_name()
        );
        let nodes = sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(nodes)
    }

    #[instrument(skip(self))]
    async fn find_children(
        &self,
        kind: EntityKind,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_children"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM {} WHERE parent_id IS NOT DISTINCT FROM $1 AND deleted = FALSE ORDER BY {}",
            NODE_COLUMNS,
            kind.table_name(),
            SIBLING_ORDER
        );
        let nodes = sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(nodes)
    }

    #[instrument(skip(self))]
    async fn find_descendants(
        &self,
        kind: EntityKind,
        prefix: &str,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_descendants"])
            .start_timer();

        // Paths only hold digits and '/', so LIKE needs no escaping.
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted = FALSE AND (path = $1 OR path LIKE $2) ORDER BY level, {}",
            NODE_COLUMNS,
            kind.table_name(),
            SIBLING_ORDER
        );
        let nodes = sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(prefix)
            .bind(format!("{}/%", prefix))
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(nodes)
    }

    #[instrument(skip(self))]
    async fn find_all(&self, kind: EntityKind) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_all"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM {} WHERE deleted = FALSE ORDER BY level, {}",
            NODE_COLUMNS,
            kind.table_name(),
            SIBLING_ORDER
        );
        let nodes = sqlx::query_as::<_, HierarchyNode>(&sql)
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(nodes)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), HierarchyError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgStoreTx {
    kind: EntityKind,
    tx: Transaction<'static, Postgres>,
}

impl PgStoreTx {
    fn table(&self) -> &'static str {
        self.kind.table_name()
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn lock_node(&mut self, id: NodeId) -> Result<Option<HierarchyNode>, HierarchyError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1 FOR UPDATE",
            NODE_COLUMNS,
            self.table()
        );
        Ok(sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn lock_sibling_group(
        &mut self,
        parent_id: Option<NodeId>,
    ) -> Result<(), HierarchyError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, ($2 % 2147483647)::int4)")
            .bind(self.kind.lock_namespace())
            .bind(parent_id.unwrap_or(0))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn children(
        &mut self,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<HierarchyNode>, HierarchyError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE parent_id IS NOT DISTINCT FROM $1 AND deleted = FALSE ORDER BY {} FOR UPDATE",
            NODE_COLUMNS,
            self.table(),
            SIBLING_ORDER
        );
        Ok(sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(parent_id)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn max_sibling_sort_order(
        &mut self,
        parent_id: Option<NodeId>,
    ) -> Result<Option<i32>, HierarchyError> {
        let sql = format!(
            "SELECT MAX(sort_order) FROM {} WHERE parent_id IS NOT DISTINCT FROM $1 AND deleted = FALSE",
            self.table()
        );
        Ok(sqlx::query_scalar::<_, Option<i32>>(&sql)
            .bind(parent_id)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn sibling_with_sort_order(
        &mut self,
        parent_id: Option<NodeId>,
        sort_order: i32,
        exclude: NodeId,
    ) -> Result<Option<HierarchyNode>, HierarchyError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE parent_id IS NOT DISTINCT FROM $1 AND sort_order = $2 \
             AND id <> $3 AND deleted = FALSE ORDER BY {} LIMIT 1 FOR UPDATE",
            NODE_COLUMNS,
            self.table(),
            SIBLING_ORDER
        );
        Ok(sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(parent_id)
            .bind(sort_order)
            .bind(exclude)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn attribute_taken(
        &mut self,
        field: &str,
        value: &str,
        exclude: Option<NodeId>,
    ) -> Result<bool, HierarchyError> {
        // Serializes concurrent writers claiming the same key.
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2 || ':' || $3))")
            .bind(self.kind.lock_namespace() + UNIQUENESS_LOCK_OFFSET)
            .bind(field)
            .bind(value)
            .execute(&mut *self.tx)
            .await?;

        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE deleted = FALSE AND attributes ->> $1 = $2 \
             AND ($3::BIGINT IS NULL OR id <> $3))",
            self.table()
        );
        Ok(sqlx::query_scalar::<_, bool>(&sql)
            .bind(field)
            .bind(value)
            .bind(exclude)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    #[instrument(skip(self))]
    async fn count_rows(
        &mut self,
        table: &str,
        column: &str,
        id: NodeId,
        filter: Option<&str>,
    ) -> Result<u64, HierarchyError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_rows"])
            .start_timer();

        let sql = match filter {
            Some(filter) => format!(
                "SELECT COUNT(*) FROM {} WHERE {} = $1 AND {}",
                table, column, filter
            ),
            None => format!("SELECT COUNT(*) FROM {} WHERE {} = $1", table, column),
        };
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await?;

        timer.observe_duration();
        Ok(count.max(0) as u64)
    }

    async fn insert(&mut self, draft: NodeDraft) -> Result<HierarchyNode, HierarchyError> {
        let sql = format!(
            r#"
            INSERT INTO {} (parent_id, path, level, sort_order, status, is_protected, deleted,
                            created_at, updated_at, version, attributes)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7, 1, $8)
            RETURNING {}
            "#,
            self.table(),
            NODE_COLUMNS
        );
        Ok(sqlx::query_as::<_, HierarchyNode>(&sql)
            .bind(draft.parent_id)
            .bind(&draft.path)
            .bind(draft.level)
            .bind(draft.sort_order)
            .bind(draft.status)
            .bind(draft.is_protected)
            .bind(draft.created_at)
            .bind(&draft.attributes)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn save(&mut self, node: &mut HierarchyNode) -> Result<(), HierarchyError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET parent_id = $2, path = $3, level = $4, sort_order = $5, status = $6,
                is_protected = $7, deleted = $8, deleted_by = $9, deleted_at = $10,
                updated_at = $11, attributes = $12, version = version + 1
            WHERE id = $1 AND version = $13
            RETURNING version
            "#,
            self.table()
        );
        let version = sqlx::query_scalar::<_, i64>(&sql)
            .bind(node.id)
            .bind(node.parent_id)
            .bind(&node.path)
            .bind(node.level)
            .bind(node.sort_order)
            .bind(node.status)
            .bind(node.is_protected)
            .bind(node.deleted)
            .bind(node.deleted_by)
            .bind(node.deleted_at)
            .bind(node.updated_at)
            .bind(&node.attributes)
            .bind(node.version)
            .fetch_optional(&mut *self.tx)
            .await?;

        match version {
            Some(v) => {
                node.version = v;
                Ok(())
            }
            None => Err(HierarchyError::ConcurrentModification(format!(
                "{} {} changed since version {}",
                self.kind, node.id, node.version
            ))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), HierarchyError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), HierarchyError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Where live references to a node of some kind are stored.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceRule {
    pub kind: EntityKind,
    pub table: &'static str,
    pub column: &'static str,
    /// Extra predicate selecting live referencing rows.
    pub live_filter: Option<&'static str>,
}

/// Users in departments, archive files in categories, role bindings of
/// permissions and user bindings of roles.
pub const DEFAULT_REFERENCE_RULES: &[ReferenceRule] = &[
    ReferenceRule {
        kind: EntityKind::Department,
        table: "users",
        column: "department_id",
        live_filter: Some("deleted = FALSE"),
    },
    ReferenceRule {
        kind: EntityKind::Category,
        table: "archive_files",
        column: "category_id",
        live_filter: Some("deleted = FALSE"),
    },
    ReferenceRule {
        kind: EntityKind::Permission,
        table: "role_permissions",
        column: "permission_id",
        live_filter: None,
    },
    ReferenceRule {
        kind: EntityKind::Role,
        table: "user_roles",
        column: "role_id",
        live_filter: None,
    },
];

/// Counts references with one `COUNT(*)` per matching rule, on the
/// connection of the transaction doing the delete.
#[derive(Debug, Clone)]
pub struct SqlReferenceCounter {
    rules: Vec<ReferenceRule>,
}

impl SqlReferenceCounter {
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_REFERENCE_RULES.to_vec())
    }

    pub fn with_rules(rules: Vec<ReferenceRule>) -> Self {
        Self { rules }
    }
}

impl Default for SqlReferenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReferenceCounter for SqlReferenceCounter {
    #[instrument(skip(self, tx))]
    async fn count_references(
        &self,
        tx: &mut dyn StoreTx,
        id: NodeId,
    ) -> Result<u64, HierarchyError> {
        let kind = tx.kind();
        let mut total: u64 = 0;
        for rule in self.rules.iter().filter(|r| r.kind == kind) {
            total += tx
                .count_rows(rule.table, rule.column, id, rule.live_filter)
                .await?;
        }
        Ok(total)
    }
}
