//! Hierarchy node model - materialized-path tree entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::cmp::Ordering;

/// Node identifier. Ids are positive; `0` is accepted at the boundary as "root".
pub type NodeId = i64;

/// Visibility status. Has no structural effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Disabled = 0,
    #[default]
    Enabled = 1,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
        }
    }
}

/// Hierarchy node entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HierarchyNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    /// Ancestor ids from the root down to the parent, e.g. `"/1/2"`. Empty for roots.
    pub path: String,
    /// Depth, roots are level 1.
    pub level: i32,
    pub sort_order: i32,
    pub status: NodeStatus,
    pub is_protected: bool,
    pub deleted: bool,
    pub deleted_by: Option<i64>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub attributes: serde_json::Value,
}

impl HierarchyNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    pub fn is_enabled(&self) -> bool {
        self.status == NodeStatus::Enabled
    }

    /// String attribute lookup, used for business keys such as `code`.
    pub fn attribute_str(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(|v| v.as_str())
    }

    /// Total order among siblings: sort order, then creation time, then id.
    pub fn sibling_cmp(&self, other: &Self) -> Ordering {
        self.sort_order
            .cmp(&other.sort_order)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Caller input for creating a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNode {
    pub parent_id: Option<NodeId>,
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub is_protected: bool,
}

impl NewNode {
    pub fn new(parent_id: Option<NodeId>, attributes: serde_json::Value) -> Self {
        Self {
            parent_id,
            attributes,
            status: NodeStatus::Enabled,
            is_protected: false,
        }
    }

    pub fn protected(mut self) -> Self {
        self.is_protected = true;
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }
}

/// Fully positioned row ready for insertion; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub parent_id: Option<NodeId>,
    pub path: String,
    pub level: i32,
    pub sort_order: i32,
    pub status: NodeStatus,
    pub is_protected: bool,
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Treat `None` and `0` alike as "no parent".
pub fn normalize_parent(parent_id: Option<NodeId>) -> Option<NodeId> {
    parent_id.filter(|id| *id != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn node(id: NodeId, sort_order: i32, created_secs: i64) -> HierarchyNode {
        let at = Utc.timestamp_opt(created_secs, 0).unwrap();
        HierarchyNode {
            id,
            parent_id: None,
            path: String::new(),
            level: 1,
            sort_order,
            status: NodeStatus::Enabled,
            is_protected: false,
            deleted: false,
            deleted_by: None,
            deleted_at: None,
            created_at: at,
            updated_at: at,
            version: 1,
            attributes: serde_json::json!({ "code": format!("N{}", id) }),
        }
    }

    #[test]
    fn sibling_order_breaks_ties_by_creation_then_id() {
        let a = node(3, 1, 100);
        let b = node(2, 1, 200);
        let c = node(1, 1, 200);
        let d = node(9, 0, 999);

        let mut siblings = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        siblings.sort_by(|x, y| x.sibling_cmp(y));
        let ids: Vec<NodeId> = siblings.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![9, 3, 1, 2]);
    }

    #[test]
    fn zero_parent_means_root() {
        assert_eq!(normalize_parent(Some(0)), None);
        assert_eq!(normalize_parent(None), None);
        assert_eq!(normalize_parent(Some(7)), Some(7));
    }

    #[test]
    fn reads_string_attributes() {
        let n = node(4, 1, 0);
        assert_eq!(n.attribute_str("code"), Some("N4"));
        assert_eq!(n.attribute_str("missing"), None);
    }
}
