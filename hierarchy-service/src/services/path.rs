//! Materialized path encoding.
//!
//! A path lists ancestor ids from the root down to the parent, each prefixed
//! by the separator: a root has `""`, its child `"/1"`, a grandchild `"/1/2"`.

use super::error::HierarchyError;
use crate::models::{HierarchyNode, NodeId};

pub const PATH_SEPARATOR: char = '/';

/// Level assigned to roots.
pub const ROOT_LEVEL: i32 = 1;

pub struct PathCodec;

impl PathCodec {
    /// Path of a node placed under `parent` (or at the root).
    pub fn compute_path(parent: Option<&HierarchyNode>) -> String {
        match parent {
            Some(p) => Self::child_prefix(p),
            None => String::new(),
        }
    }

    pub fn compute_level(parent: Option<&HierarchyNode>) -> i32 {
        match parent {
            Some(p) => p.level + 1,
            None => ROOT_LEVEL,
        }
    }

    /// Path every direct child of `node` carries; also the prefix shared by all descendants.
    pub fn child_prefix(node: &HierarchyNode) -> String {
        format!("{}{}{}", node.path, PATH_SEPARATOR, node.id)
    }

    /// Ancestor ids, root first. Malformed paths are an integrity error, never skipped.
    pub fn decode_ancestor_ids(path: &str) -> Result<Vec<NodeId>, HierarchyError> {
        if path.is_empty() {
            return Ok(Vec::new());
        }

        let rest = path.strip_prefix(PATH_SEPARATOR).ok_or_else(|| {
            HierarchyError::integrity(
                None,
                format!("path '{}' does not start with '{}'", path, PATH_SEPARATOR),
            )
        })?;

        rest.split(PATH_SEPARATOR)
            .map(|segment| match segment.parse::<NodeId>() {
                Ok(id) if id > 0 => Ok(id),
                _ => Err(HierarchyError::integrity(
                    None,
                    format!("path '{}' has invalid segment '{}'", path, segment),
                )),
            })
            .collect()
    }

    /// Decode a node's own path, tagging any integrity error with its id.
    pub fn ancestors_of(node: &HierarchyNode) -> Result<Vec<NodeId>, HierarchyError> {
        Self::decode_ancestor_ids(&node.path).map_err(|e| match e {
            HierarchyError::DataIntegrity { detail, .. } => {
                HierarchyError::integrity(Some(node.id), detail)
            }
            other => other,
        })
    }

    pub fn encode(ancestor_ids: &[NodeId]) -> String {
        ancestor_ids
            .iter()
            .map(|id| format!("{}{}", PATH_SEPARATOR, id))
            .collect()
    }

    /// Level implied by a path.
    pub fn level_of(path: &str) -> Result<i32, HierarchyError> {
        let depth = Self::decode_ancestor_ids(path)?.len();
        Ok(ROOT_LEVEL + depth as i32)
    }

    /// Whether `path` lies at or below `prefix` on a segment boundary.
    pub fn is_within(path: &str, prefix: &str) -> bool {
        match path.strip_prefix(prefix) {
            Some("") => true,
            Some(rest) => rest.starts_with(PATH_SEPARATOR),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeStatus;
    use chrono::Utc;

    fn node(id: NodeId, path: &str, level: i32) -> HierarchyNode {
        HierarchyNode {
            id,
            parent_id: PathCodec::decode_ancestor_ids(path).unwrap().last().copied(),
            path: path.to_string(),
            level,
            sort_order: 1,
            status: NodeStatus::Enabled,
            is_protected: false,
            deleted: false,
            deleted_by: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
            attributes: serde_json::Value::Null,
        }
    }

    #[test]
    fn root_has_empty_path_and_level_one() {
        assert_eq!(PathCodec::compute_path(None), "");
        assert_eq!(PathCodec::compute_level(None), ROOT_LEVEL);
        assert!(PathCodec::decode_ancestor_ids("").unwrap().is_empty());
    }

    #[test]
    fn child_path_appends_parent_id() {
        let root = node(1, "", 1);
        let child = node(2, &PathCodec::compute_path(Some(&root)), 2);
        assert_eq!(child.path, "/1");
        assert_eq!(PathCodec::compute_path(Some(&child)), "/1/2");
        assert_eq!(PathCodec::compute_level(Some(&child)), 3);
    }

    #[test]
    fn decodes_root_first() {
        assert_eq!(PathCodec::decode_ancestor_ids("/1/20/3").unwrap(), vec![1, 20, 3]);
        assert_eq!(PathCodec::encode(&[1, 20, 3]), "/1/20/3");
        assert_eq!(PathCodec::level_of("/1/20/3").unwrap(), 4);
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["1/2", "/1//2", "/1/x", "/", "/-4", "/0"] {
            let err = PathCodec::decode_ancestor_ids(bad).unwrap_err();
            assert!(
                matches!(err, HierarchyError::DataIntegrity { .. }),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn ancestors_of_tags_node_id() {
        let mut broken = node(7, "", 2);
        broken.path = "/1/abc".to_string();
        match PathCodec::ancestors_of(&broken) {
            Err(HierarchyError::DataIntegrity { node_id, .. }) => assert_eq!(node_id, Some(7)),
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[test]
    fn prefix_match_respects_segment_boundaries() {
        assert!(PathCodec::is_within("/1/2", "/1/2"));
        assert!(PathCodec::is_within("/1/2/5", "/1/2"));
        assert!(!PathCodec::is_within("/1/23", "/1/2"));
        assert!(!PathCodec::is_within("/4", "/1"));
    }
}
