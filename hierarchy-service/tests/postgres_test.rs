//! PostgreSQL store integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p hierarchy-service -- --ignored

mod common;

use common::{attrs, ctx, dept, init_tracing};
use hierarchy_service::config::DatabaseConfig;
use hierarchy_service::db::{create_pool, run_migrations};
use hierarchy_service::models::{EntityKind, NewNode};
use hierarchy_service::services::{
    HierarchyError, HierarchyManager, HierarchyStore, ManagerSettings, PgHierarchyStore,
    RecordingCacheInvalidator, RetryPolicy, SqlReferenceCounter, StoreTx, UniqueAttribute,
};
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

async fn setup() -> (PgPool, Arc<HierarchyManager>) {
    setup_with(10).await
}

async fn setup_with(max_connections: u32) -> (PgPool, Arc<HierarchyManager>) {
    init_tracing();

    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run PostgreSQL tests");
    let pool = create_pool(&DatabaseConfig {
        url,
        max_connections,
        min_connections: 1,
    })
    .await
    .expect("Failed to connect to test database");
    run_migrations(&pool).await.expect("Failed to run migrations");

    sqlx::query("TRUNCATE departments, users, hierarchy_audit_log RESTART IDENTITY")
        .execute(&pool)
        .await
        .expect("Failed to reset tables");

    let manager = HierarchyManager::new(
        EntityKind::Department,
        Arc::new(PgHierarchyStore::new(pool.clone(), 2000)),
    )
    .with_references(Arc::new(SqlReferenceCounter::new()))
    .with_uniqueness(Arc::new(UniqueAttribute::new("code")))
    .with_cache(Arc::new(RecordingCacheInvalidator::new()))
    .with_settings(ManagerSettings {
        retry: RetryPolicy::with_max_retries(10),
        operation_timeout: Duration::from_secs(10),
        ..ManagerSettings::default()
    });

    (pool, Arc::new(manager))
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
#[serial]
async fn move_rewrites_paths_in_the_database() {
    let (_pool, m) = setup().await;
    let a = dept(&m, None, "A").await;
    let b = dept(&m, Some(a.id), "B").await;
    let c = dept(&m, Some(b.id), "C").await;
    assert_eq!(c.path, format!("/{}/{}", a.id, b.id));

    let outcome = m.move_node(b.id, None, &ctx()).await.unwrap();
    assert_eq!(outcome.descendants_rewritten, 1);

    let ancestors = m.get_ancestors(c.id).await.unwrap();
    assert_eq!(ancestors.iter().map(|n| n.id).collect::<Vec<_>>(), vec![b.id]);
    assert_eq!(m.get_by_id(c.id).await.unwrap().level, 2);

    let err = m.move_node(b.id, Some(c.id), &ctx()).await.unwrap_err();
    assert_eq!(err.reason(), "cycle");

    assert!(m.verify_integrity().await.unwrap().is_consistent());
}

#[tokio::test]
#[ignore]
#[serial]
async fn users_keep_their_department_alive() {
    let (pool, m) = setup().await;
    let d = dept(&m, None, "SALES").await;
    sqlx::query("INSERT INTO users (department_id) VALUES ($1), ($1)")
        .bind(d.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = m.delete(d.id, &ctx()).await.unwrap_err();
    assert!(matches!(err, HierarchyError::InUse { references: 2, .. }));

    sqlx::query("UPDATE users SET deleted = TRUE WHERE department_id = $1")
        .bind(d.id)
        .execute(&pool)
        .await
        .unwrap();
    m.delete(d.id, &ctx()).await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn concurrent_deletes_fit_in_a_single_connection() {
    let (pool, m) = setup_with(1).await;
    let root = dept(&m, None, "ROOT").await;
    let mut leaves = Vec::new();
    for i in 0..8 {
        leaves.push(dept(&m, Some(root.id), &format!("LEAF-{}", i)).await.id);
    }
    sqlx::query("INSERT INTO users (department_id) VALUES ($1)")
        .bind(leaves[0])
        .execute(&pool)
        .await
        .unwrap();

    let mut deletes = Vec::new();
    for &id in &leaves {
        let m = Arc::clone(&m);
        deletes.push(tokio::spawn(async move { (id, m.delete(id, &ctx()).await) }));
    }
    let checks: Vec<_> = (0..4)
        .map(|_| {
            let m = Arc::clone(&m);
            let root_id = root.id;
            tokio::spawn(async move { m.check_deletion(root_id).await })
        })
        .collect();

    for handle in deletes {
        let (id, result) = handle.await.unwrap();
        if id == leaves[0] {
            assert!(
                matches!(result, Err(HierarchyError::InUse { references: 1, .. })),
                "{:?}",
                result
            );
        } else {
            result.unwrap();
        }
    }
    for handle in checks {
        let check = handle.await.unwrap().unwrap();
        assert!(!check.is_allowed());
    }

    let remaining = m.get_children(Some(root.id)).await.unwrap();
    assert_eq!(remaining.iter().map(|n| n.id).collect::<Vec<_>>(), vec![leaves[0]]);
}

#[tokio::test]
#[ignore]
#[serial]
async fn stale_versions_are_rejected() {
    let (pool, m) = setup().await;
    let d = dept(&m, None, "OPS").await;

    let store = PgHierarchyStore::new(pool, 2000);
    let mut tx = store.begin(EntityKind::Department).await.unwrap();
    let mut node = tx.lock_node(d.id).await.unwrap().unwrap();
    node.version -= 1;
    let err = tx.save(&mut node).await.unwrap_err();
    assert!(matches!(err, HierarchyError::ConcurrentModification(_)));
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn duplicate_codes_are_rejected() {
    let (_pool, m) = setup().await;
    dept(&m, None, "FIN").await;
    let err = m
        .create(NewNode::new(None, attrs(EntityKind::Department, "FIN")), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "duplicate_key");
}

#[tokio::test]
#[ignore]
#[serial]
async fn concurrent_moves_and_creates_stay_consistent() {
    let (_pool, m) = setup().await;
    let left = dept(&m, None, "LEFT").await;
    let right = dept(&m, None, "RIGHT").await;
    let branch = dept(&m, Some(left.id), "BRANCH").await;
    let leaf = dept(&m, Some(branch.id), "LEAF").await;

    let (branch_id, leaf_id) = (branch.id, leaf.id);
    let mut handles = Vec::new();
    for i in 0..10 {
        let m = Arc::clone(&m);
        let to = if i % 2 == 0 { right.id } else { left.id };
        handles.push(tokio::spawn(async move {
            m.move_node(branch_id, Some(to), &ctx()).await.map(|_| ())
        }));
    }
    for i in 0..10 {
        let m = Arc::clone(&m);
        let code = format!("NEW-{}", i);
        handles.push(tokio::spawn(async move {
            m.create(
                NewNode::new(Some(leaf_id), attrs(EntityKind::Department, &code)),
                &ctx(),
            )
            .await
            .map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let report = m.verify_integrity().await.unwrap();
    assert_eq!(report.checked, 14);
    assert!(report.is_consistent(), "{:?}", report.issues);

    let children = m.get_children(Some(leaf.id)).await.unwrap();
    let mut orders: Vec<i32> = children.iter().map(|n| n.sort_order).collect();
    orders.dedup();
    assert_eq!(orders.len(), 10);
}
