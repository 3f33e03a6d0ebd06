//! Common test utilities for hierarchy-service integration tests.

use hierarchy_service::models::{EntityKind, HierarchyNode, NewNode, NodeId, OperationContext};
use hierarchy_service::services::{
    Hierarchies, HierarchyManager, InMemoryReferences, ManagerSettings, MemoryHierarchyStore,
    RecordingAuditSink, RecordingCacheInvalidator, RetryPolicy, UniqueAttribute,
};
use hierarchy_service::startup::{build_hierarchies, Collaborators};
use hierarchy_service::{build_router, AppState};
use serde_json::{json, Value};
use service_core::axum::Router;
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub const ACTOR: i64 = 7;

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,hierarchy_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Every kind served from one in-memory store, with recording collaborators.
pub struct TestHierarchy {
    pub store: MemoryHierarchyStore,
    pub cache: Arc<RecordingCacheInvalidator>,
    pub audit: Arc<RecordingAuditSink>,
    pub references: Arc<InMemoryReferences>,
    pub hierarchies: Hierarchies,
}

impl TestHierarchy {
    pub fn new() -> Self {
        Self::with_retries(3)
    }

    pub fn with_retries(max_retries: u32) -> Self {
        init_tracing();

        let store = MemoryHierarchyStore::new();
        let cache = Arc::new(RecordingCacheInvalidator::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let references = Arc::new(InMemoryReferences::new());

        let hierarchies = build_hierarchies(&Collaborators {
            store: Arc::new(store.clone()),
            references: references.clone(),
            uniqueness: Arc::new(UniqueAttribute::new("code")),
            cache: cache.clone(),
            audit: audit.clone(),
            settings: ManagerSettings {
                retry: RetryPolicy::immediate(max_retries),
                operation_timeout: Duration::from_secs(2),
                ..ManagerSettings::default()
            },
        });

        Self {
            store,
            cache,
            audit,
            references,
            hierarchies,
        }
    }

    pub fn manager(&self, kind: EntityKind) -> Arc<HierarchyManager> {
        self.hierarchies
            .get(kind)
            .expect("every kind is registered")
    }

    pub fn departments(&self) -> Arc<HierarchyManager> {
        self.manager(EntityKind::Department)
    }

    pub fn router(&self) -> Router {
        build_router(AppState {
            service_name: "hierarchy-service-test".to_string(),
            hierarchies: self.hierarchies.clone(),
        })
    }
}

pub fn ctx() -> OperationContext {
    OperationContext::now(ACTOR)
}

/// Minimal valid attributes for `kind`.
pub fn attrs(kind: EntityKind, code: &str) -> Value {
    match kind {
        EntityKind::Department | EntityKind::Category => json!({ "name": code, "code": code }),
        EntityKind::Permission => {
            json!({ "name": code, "code": code, "permission_type": "menu" })
        }
        EntityKind::Role => json!({ "name": code, "code": code, "role_type": "business" }),
    }
}

/// Create a department node with `code` under `parent`.
pub async fn dept(
    manager: &HierarchyManager,
    parent: Option<NodeId>,
    code: &str,
) -> HierarchyNode {
    manager
        .create(NewNode::new(parent, attrs(manager.kind(), code)), &ctx())
        .await
        .expect("Failed to create node")
}

/// Root with `width` children per node down to `depth` levels below it.
pub async fn build_subtree(
    manager: &HierarchyManager,
    parent: Option<NodeId>,
    code: &str,
    width: usize,
    depth: usize,
) -> Vec<HierarchyNode> {
    let root = dept(manager, parent, code).await;
    let mut all = vec![root.clone()];
    let mut frontier = vec![root];
    for _ in 0..depth {
        let mut next = Vec::new();
        for node in &frontier {
            for i in 0..width {
                let code = format!("{}-{}", node.attribute_str("code").unwrap_or("n"), i);
                next.push(dept(manager, Some(node.id), &code).await);
            }
        }
        all.extend(next.iter().cloned());
        frontier = next;
    }
    all
}
