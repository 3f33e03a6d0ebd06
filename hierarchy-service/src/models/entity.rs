//! Entity kinds managed as hierarchies.

use serde::{Deserialize, Serialize};

/// The tree-shaped entity kinds sharing one hierarchy implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "departments")]
    Department,
    #[serde(rename = "categories")]
    Category,
    #[serde(rename = "permissions")]
    Permission,
    #[serde(rename = "roles")]
    Role,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Department,
        EntityKind::Category,
        EntityKind::Permission,
        EntityKind::Role,
    ];

    /// Singular name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::Category => "category",
            Self::Permission => "permission",
            Self::Role => "role",
        }
    }

    /// Backing table. Only these fixed names are ever interpolated into SQL.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Department => "departments",
            Self::Category => "categories",
            Self::Permission => "permissions",
            Self::Role => "roles",
        }
    }

    /// Stable small integer used to namespace advisory locks.
    pub fn lock_namespace(&self) -> i32 {
        match self {
            Self::Department => 1,
            Self::Category => 2,
            Self::Permission => 3,
            Self::Role => 4,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "department" | "departments" => Ok(Self::Department),
            "category" | "categories" => Ok(Self::Category),
            "permission" | "permissions" => Ok(Self::Permission),
            "role" | "roles" => Ok(Self::Role),
            _ => Err(format!("Invalid entity kind: {}", s)),
        }
    }
}
