use service_core::error::AppError;
use thiserror::Error;

use crate::models::{EntityKind, NodeId};

#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("{kind} node {id} not found")]
    NotFound { kind: EntityKind, id: NodeId },

    #[error("parent {kind} node {parent_id} not found or not enabled")]
    ParentNotFound { kind: EntityKind, parent_id: NodeId },

    #[error("{kind} with {field} '{value}' already exists")]
    DuplicateKey {
        kind: EntityKind,
        field: String,
        value: String,
    },

    #[error("moving {kind} node {node_id} under {parent_id} would create a cycle")]
    Cycle {
        kind: EntityKind,
        node_id: NodeId,
        parent_id: NodeId,
    },

    #[error("{kind} node {id} is protected")]
    Protected { kind: EntityKind, id: NodeId },

    #[error("{kind} node {id} has {children} live children")]
    HasChildren {
        kind: EntityKind,
        id: NodeId,
        children: usize,
    },

    #[error("{kind} node {id} is still referenced {references} times")]
    InUse {
        kind: EntityKind,
        id: NodeId,
        references: u64,
    },

    #[error("{kind} tree is {depth} levels deep, nested views stop at {limit}")]
    TreeTooDeep {
        kind: EntityKind,
        depth: usize,
        limit: usize,
    },

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("data integrity violation: {detail}")]
    DataIntegrity {
        node_id: Option<NodeId>,
        detail: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl HierarchyError {
    /// Whether the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HierarchyError::ConcurrentModification(_) | HierarchyError::Timeout { .. }
        )
    }

    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            HierarchyError::NotFound { .. } => "not_found",
            HierarchyError::ParentNotFound { .. } => "parent_not_found",
            HierarchyError::DuplicateKey { .. } => "duplicate_key",
            HierarchyError::Cycle { .. } => "cycle",
            HierarchyError::Protected { .. } => "protected",
            HierarchyError::HasChildren { .. } => "has_children",
            HierarchyError::InUse { .. } => "in_use",
            HierarchyError::TreeTooDeep { .. } => "tree_too_deep",
            HierarchyError::ConcurrentModification(_) => "concurrent_modification",
            HierarchyError::Timeout { .. } => "timeout",
            HierarchyError::DataIntegrity { .. } => "data_integrity",
            HierarchyError::Validation(_) => "validation",
            HierarchyError::Store(_) => "store",
        }
    }

    pub fn integrity(node_id: Option<NodeId>, detail: impl Into<String>) -> Self {
        HierarchyError::DataIntegrity {
            node_id,
            detail: detail.into(),
        }
    }
}

impl From<sqlx::Error> for HierarchyError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            // serialization_failure, deadlock_detected, lock_not_available
            if matches!(db_err.code().as_deref(), Some("40001" | "40P01" | "55P03")) {
                return HierarchyError::ConcurrentModification(db_err.message().to_string());
            }
        }
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return HierarchyError::Timeout {
                operation: "acquire connection",
                timeout_ms: 0,
            };
        }
        HierarchyError::Store(anyhow::anyhow!(err))
    }
}

impl From<HierarchyError> for AppError {
    fn from(err: HierarchyError) -> Self {
        let reason = err.reason();
        match err {
            HierarchyError::NotFound { .. } | HierarchyError::ParentNotFound { .. } => {
                AppError::NotFound(anyhow::anyhow!(err))
            }
            HierarchyError::DuplicateKey { .. }
            | HierarchyError::Cycle { .. }
            | HierarchyError::Protected { .. }
            | HierarchyError::HasChildren { .. }
            | HierarchyError::InUse { .. }
            | HierarchyError::TreeTooDeep { .. } => AppError::Rejected {
                reason,
                message: err.to_string(),
            },
            HierarchyError::ConcurrentModification(_) | HierarchyError::Timeout { .. } => {
                AppError::ServiceUnavailable(err.to_string(), Some(1))
            }
            HierarchyError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            HierarchyError::DataIntegrity { .. } => AppError::InternalError(anyhow::anyhow!(err)),
            HierarchyError::Store(e) => AppError::DatabaseError(e),
        }
    }
}
