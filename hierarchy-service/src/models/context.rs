//! Per-call actor and clock context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who performs a mutation and when. Supplied by the caller on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub actor_id: i64,
    pub at: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(actor_id: i64, at: DateTime<Utc>) -> Self {
        Self { actor_id, at }
    }

    /// Context stamped with the current wall-clock time.
    pub fn now(actor_id: i64) -> Self {
        Self::new(actor_id, Utc::now())
    }
}
