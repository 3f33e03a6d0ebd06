//! Audit trail of hierarchy mutations.
//!
//! Sinks are fire-and-forget: `record` never reports failure to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::{EntityKind, NodeId, OperationContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Move,
    Delete,
    Restore,
    UpdateAttributes,
    SetStatus,
    Reorder,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::UpdateAttributes => "update_attributes",
            Self::SetStatus => "set_status",
            Self::Reorder => "reorder",
        }
    }
}

/// One audited mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: EntityKind,
    pub action: AuditAction,
    pub node_id: NodeId,
    pub actor_id: i64,
    pub at: DateTime<Utc>,
    /// Action-specific details such as old and new parent.
    pub details: serde_json::Value,
}

impl AuditRecord {
    pub fn new(
        kind: EntityKind,
        action: AuditAction,
        node_id: NodeId,
        ctx: &OperationContext,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            action,
            node_id,
            actor_id: ctx.actor_id,
            at: ctx.at,
            details,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes audit records to the structured log.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            kind = %record.kind,
            action = record.action.as_str(),
            node_id = record.node_id,
            actor_id = record.actor_id,
            at = %record.at,
            details = %record.details,
            "Hierarchy audit"
        );
    }
}

/// Persists audit records to `hierarchy_audit_log` without blocking the caller.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PgAuditSink {
    fn record(&self, record: AuditRecord) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO hierarchy_audit_log (entity_kind, action, node_id, actor_id, occurred_at, details)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(record.kind.table_name())
            .bind(record.action.as_str())
            .bind(record.node_id)
            .bind(record.actor_id)
            .bind(record.at)
            .bind(&record.details)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::error!(
                    error = %e,
                    kind = %record.kind,
                    action = record.action.as_str(),
                    node_id = record.node_id,
                    "Failed to write hierarchy audit log"
                );
            }
        });
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct RecordingAuditSink {
    pub records: std::sync::Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_carry_caller_context() {
        let ctx = OperationContext::now(42);
        let sink = RecordingAuditSink::new();
        sink.record(AuditRecord::new(
            EntityKind::Permission,
            AuditAction::Move,
            7,
            &ctx,
            serde_json::json!({ "from": 1, "to": null }),
        ));

        let records = sink.recorded();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor_id, 42);
        assert_eq!(records[0].at, ctx.at);
        assert_eq!(records[0].action.as_str(), "move");
    }
}
