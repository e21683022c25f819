//! Integration tests for the counter stores
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, both backends are tested (PostgreSQL only when DATABASE_URL is set)

use beacon::models::{Event, LegacyCounts};
use beacon::storage::{CounterStore, PostgresStore, SqliteStore};
use std::sync::Arc;

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true, // Test all backends if not specified
    }
}

/// Helper to create SQLite test storage
async fn create_sqlite_store() -> Arc<dyn CounterStore> {
    let store = SqliteStore::new("sqlite::memory:", 5).await.unwrap();
    store.init().await.unwrap();
    Arc::new(store)
}

/// Helper to create PostgreSQL test storage
async fn create_postgres_store() -> Option<Arc<dyn CounterStore>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    if !db_url.starts_with("postgres") {
        return None;
    }
    let store = PostgresStore::new(&db_url, 5).await.ok()?;
    store.init().await.ok()?;
    Some(Arc::new(store))
}

/// Object ids unique to one test run so PostgreSQL runs do not collide
fn object(name: &str) -> String {
    format!("{}-{}", name, beacon::identity::generate_visitor_id())
}

async fn check_repeat_visitor_is_idempotent(store: Arc<dyn CounterStore>) {
    let page = object("page");

    store.record(&Event::new(&page, "visitor")).await.unwrap();
    let first = store.snapshot(&page).await.unwrap();
    assert_eq!(first.visits, 1);
    assert_eq!(first.uniques, 1);

    for _ in 0..9 {
        store.record(&Event::new(&page, "visitor")).await.unwrap();
    }
    let after = store.snapshot(&page).await.unwrap();
    assert_eq!(after.visits, 10);
    assert_eq!(after.uniques, 1);
}

async fn check_concurrent_records(store: Arc<dyn CounterStore>) {
    let page = object("hot");

    let mut handles = vec![];
    for i in 0..50 {
        let store = Arc::clone(&store);
        let page = page.clone();
        handles.push(tokio::spawn(async move {
            store
                .record(&Event::new(page, format!("visitor-{}", i % 10)))
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snap = store.snapshot(&page).await.unwrap();
    assert_eq!(snap.visits, 50, "every record is counted exactly once");
    assert_eq!(snap.uniques, 10);
}

async fn check_multi_object_union(store: Arc<dyn CounterStore>) {
    let foo = object("foo");
    let bar = object("bar");

    for _ in 0..10 {
        for id in [&foo, &bar] {
            for user in ["jelder", "cmbt"] {
                store.record(&Event::new(id.as_str(), user)).await.unwrap();
            }
        }
    }
    store.record(&Event::new(bar.as_str(), "only-bar")).await.unwrap();

    let snap = store
        .snapshot_many(&[foo.clone(), bar.clone()])
        .await
        .unwrap();
    assert_eq!(snap.visits, 41);
    assert_eq!(snap.uniques, 3);

    // A repeated id contributes its visits again but no new visitors
    let snap = store
        .snapshot_many(&[foo.clone(), foo.clone(), bar.clone()])
        .await
        .unwrap();
    assert_eq!(snap.visits, 61);
    assert_eq!(snap.uniques, 3);
}

async fn check_legacy_counters(store: Arc<dyn CounterStore>) {
    let page = object("legacy");
    let other = object("other");

    store
        .backfill(&page, LegacyCounts { visits: 5, uniques: 2 })
        .await
        .unwrap();
    store
        .backfill(&other, LegacyCounts { visits: 7, uniques: 4 })
        .await
        .unwrap();

    let snap = store.snapshot(&page).await.unwrap();
    assert_eq!(snap.visits, 0);
    assert_eq!(snap.uniques, 0);
    assert_eq!(snap.legacy, LegacyCounts { visits: 5, uniques: 2 });

    let snap = store.snapshot_many(&[page, other]).await.unwrap();
    assert_eq!(snap.legacy, LegacyCounts { visits: 12, uniques: 6 });
}

async fn check_unknown_object(store: Arc<dyn CounterStore>) {
    let ghost = object("ghost");
    let snap = store.snapshot(&ghost).await.unwrap();
    assert_eq!(snap, Default::default());

    let snap = store.snapshot_many(&[ghost]).await.unwrap();
    assert_eq!(snap, Default::default());
}

#[tokio::test]
async fn test_repeat_visitor_is_idempotent_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_repeat_visitor_is_idempotent(create_sqlite_store().await).await;
}

#[tokio::test]
async fn test_concurrent_records_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_concurrent_records(create_sqlite_store().await).await;
}

#[tokio::test]
async fn test_multi_object_union_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_multi_object_union(create_sqlite_store().await).await;
}

#[tokio::test]
async fn test_legacy_counters_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_legacy_counters(create_sqlite_store().await).await;
}

#[tokio::test]
async fn test_unknown_object_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_unknown_object(create_sqlite_store().await).await;
}

#[tokio::test]
async fn test_repeat_visitor_is_idempotent_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(store) = create_postgres_store().await else {
        return;
    };
    check_repeat_visitor_is_idempotent(store).await;
}

#[tokio::test]
async fn test_concurrent_records_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(store) = create_postgres_store().await else {
        return;
    };
    check_concurrent_records(store).await;
}

#[tokio::test]
async fn test_multi_object_union_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(store) = create_postgres_store().await else {
        return;
    };
    check_multi_object_union(store).await;
}

#[tokio::test]
async fn test_legacy_counters_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(store) = create_postgres_store().await else {
        return;
    };
    check_legacy_counters(store).await;
}

#[tokio::test]
async fn test_unknown_object_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(store) = create_postgres_store().await else {
        return;
    };
    check_unknown_object(store).await;
}
