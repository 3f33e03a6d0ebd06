//! Domain models for hierarchy-service.

mod attributes;
mod context;
mod entity;
mod node;
mod tree;

pub use attributes::{
    validate_attributes, CategoryAttributes, DepartmentAttributes, PermissionAttributes,
    PermissionType, RoleAttributes, RoleType,
};
pub use context::OperationContext;
pub use entity::EntityKind;
pub use node::{normalize_parent, HierarchyNode, NewNode, NodeDraft, NodeId, NodeStatus};
pub use tree::{AssembledTree, FlatTree, FlatTreeNode, TreeNode, TreeStats};
