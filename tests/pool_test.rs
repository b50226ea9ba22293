//! Context pool behavior against real SQLite connections.

mod common;

use common::{COUNTRY, Country, sqlite_source};
use liteorm_core::db::{DaoContextPool, DaoContextPoolFactory, PoolStats};
use liteorm_core::error::DbError;
use liteorm_core::meta::Catalog;
use liteorm_core::sync::{SchemaSync, SyncPlan};
use std::sync::Arc;

#[tokio::test]
async fn test_retains_at_most_pool_size_open_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let pool = DaoContextPool::new(sqlite_source(dir.path(), "main", "pool_size=3"));

    for extra in [0usize, 1, 4] {
        let before = pool.stats();
        let mut contexts = Vec::new();
        for _ in 0..pool.pool_size() + extra {
            let mut ctx = pool.acquire().await;
            ctx.ensure_open().await.unwrap();
            contexts.push(ctx);
        }
        for ctx in contexts {
            pool.return_context(ctx).await;
        }

        let after = pool.stats();
        assert_eq!(after.idle, pool.pool_size());
        assert_eq!(after.disposed - before.disposed, extra);
    }
}

#[tokio::test]
async fn test_reused_context_keeps_its_connection() {
    let dir = tempfile::tempdir().unwrap();
    let pool = DaoContextPool::new(sqlite_source(dir.path(), "main", ""));

    let mut ctx = pool.acquire().await;
    ctx.ensure_open().await.unwrap();
    let id = ctx.id().to_string();
    pool.return_context(ctx).await;

    let again = pool.acquire().await;
    assert_eq!(again.id(), id);
    assert!(again.is_open());
    assert_eq!(
        pool.stats(),
        PoolStats {
            idle: 0,
            created: 1,
            disposed: 0
        }
    );
}

#[tokio::test]
async fn test_returned_context_is_reset() {
    let dir = tempfile::tempdir().unwrap();
    let pool = DaoContextPool::new(sqlite_source(dir.path(), "main", ""));

    let mut ctx = pool.acquire().await;
    assert!(
        ctx.begin_transaction(Default::default())
            .await
            .unwrap()
    );
    assert!(ctx.in_transaction());
    pool.return_context(ctx).await;

    let again = pool.acquire().await;
    assert!(!again.in_transaction());
    assert_eq!(again.lock_count(), 0);
}

#[tokio::test]
async fn test_guard_release_and_drop_return_context() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(DaoContextPool::new(sqlite_source(dir.path(), "main", "")));

    let guard = pool.acquire_guarded().await;
    guard.release().await;
    assert_eq!(pool.stats().idle, 1);

    let guard = pool.acquire_guarded().await;
    assert_eq!(pool.stats().idle, 0);
    drop(guard);
    assert_eq!(pool.stats().idle, 1);
    assert_eq!(pool.stats().created, 1);
}

#[tokio::test]
async fn test_guard_dropped_mid_transaction_comes_back_clean() {
    let dir = tempfile::tempdir().unwrap();
    let factory = DaoContextPoolFactory::new(
        vec![sqlite_source(dir.path(), "main", "sync_schema=true")],
        None,
    )
    .unwrap();
    let catalog = Catalog::new();
    SchemaSync::new(&factory, &catalog)
        .run(&SyncPlan::new().add("main", COUNTRY))
        .await
        .unwrap();

    {
        let mut ctx = factory.acquire(None).await.unwrap();
        assert!(ctx.begin_transaction(Default::default()).await.unwrap());
        ctx.insert(&catalog, &mut Country::named("Nepal")).await.unwrap();
        // Dropped without release while the transaction is open.
    }

    let pool = factory.pool(None).unwrap();
    assert_eq!(pool.stats().idle, 1);
    let mut ctx = factory.acquire(None).await.unwrap();
    assert!(!ctx.in_transaction());
    assert_eq!(ctx.count(&catalog, COUNTRY, None).await.unwrap(), 0);
    assert_eq!(pool.stats().created, 1);
    ctx.release().await;
}

#[tokio::test]
async fn test_unavailable_data_source_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let factory = DaoContextPoolFactory::new(
        vec![sqlite_source(dir.path(), "main", "sync_schema=true")],
        None,
    )
    .unwrap();
    let catalog = Catalog::new();
    SchemaSync::new(&factory, &catalog)
        .run(&SyncPlan::new().add("main", COUNTRY))
        .await
        .unwrap();

    let mut ctx = factory.acquire(Some("main")).await.unwrap();
    ctx.insert(&catalog, &mut Country::named("Peru")).await.unwrap();

    factory.mark_unavailable("main").unwrap();
    let err = ctx
        .insert(&catalog, &mut Country::named("Chile"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Permission { .. }));

    // Reads still work.
    assert_eq!(ctx.count(&catalog, COUNTRY, None).await.unwrap(), 1);
    ctx.release().await;
}

#[tokio::test]
async fn test_factory_resolves_names() {
    let dir = tempfile::tempdir().unwrap();
    let factory = DaoContextPoolFactory::new(
        vec![
            sqlite_source(dir.path(), "main", ""),
            sqlite_source(dir.path(), "audit", "pool_size=1"),
        ],
        Some("audit"),
    )
    .unwrap();

    assert_eq!(factory.default_name(), "audit");
    let guard = factory.acquire(None).await.unwrap();
    assert_eq!(guard.data_source(), "audit");
    guard.release().await;

    let err = factory.acquire(Some("reports")).await.unwrap_err();
    assert!(matches!(err, DbError::Configuration { .. }));
    assert!(factory.mark_unavailable("reports").is_err());

    factory.close_all().await;
    assert_eq!(factory.pool(Some("audit")).unwrap().stats().idle, 0);
}
