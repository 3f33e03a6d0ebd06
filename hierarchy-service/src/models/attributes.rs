//! Typed views of the per-kind domain attributes.
//!
//! Attributes travel through the hierarchy core as opaque JSON. These structs
//! only gate what callers may store; unknown extra fields are carried through.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::EntityKind;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DepartmentAttributes {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    pub leader_id: Option<i64>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CategoryAttributes {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    #[validate(range(min = 1, max = 5))]
    pub default_security_level: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub retention_years: Option<i32>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    Menu,
    Button,
    Api,
    Data,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PermissionAttributes {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub code: String,
    pub permission_type: PermissionType,
    #[validate(length(max = 255))]
    pub resource_path: Option<String>,
    #[validate(length(max = 10))]
    pub http_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    System,
    Business,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RoleAttributes {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    pub role_type: RoleType,
    #[validate(length(max = 50))]
    pub data_scope: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

/// Check that `attributes` satisfy the typed shape required for `kind`.
pub fn validate_attributes(kind: EntityKind, attributes: &serde_json::Value) -> Result<(), String> {
    fn check<T: DeserializeOwned + Validate>(
        kind: EntityKind,
        attributes: &serde_json::Value,
    ) -> Result<(), String> {
        let typed: T = serde_json::from_value(attributes.clone())
            .map_err(|e| format!("invalid {} attributes: {}", kind, e))?;
        typed.validate().map_err(|e| e.to_string())
    }

    match kind {
        EntityKind::Department => check::<DepartmentAttributes>(kind, attributes),
        EntityKind::Category => check::<CategoryAttributes>(kind, attributes),
        EntityKind::Permission => check::<PermissionAttributes>(kind, attributes),
        EntityKind::Role => check::<RoleAttributes>(kind, attributes),
    }
}
