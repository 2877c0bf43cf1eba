//! 连接池集成测试：真实 SQLite 文件上的容量、独占与排队行为

mod common;

use common::{temp_config, InstrumentedFactory};
use rat_sqlguard::{
    CircuitBreakerConfig, ConnectionPool, ConnectionType, DataValue, DatabaseEventKind, GuardError,
    MemoryEventSink, OperationContext, Priority,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn build_pool(dir: &tempfile::TempDir, max: u32, sink: Arc<MemoryEventSink>) -> ConnectionPool {
    let config = temp_config(dir.path(), max);
    let factory = Arc::new(InstrumentedFactory::sqlite(&config));
    ConnectionPool::new(config.pool, CircuitBreakerConfig::default(), factory, sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_twenty_requests_never_exceed_five_connections() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemoryEventSink::new());
    let pool = build_pool(&dir, 5, sink.clone());

    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let ctx = OperationContext::new(format!("burst-{}", i));
            let conn = pool
                .get_connection(ConnectionType::Read, Priority::Normal, &ctx)
                .await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(conn);
            Ok::<_, GuardError>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let created = sink.count(DatabaseEventKind::ConnectionCreated);
    println!("🔍 20个并发请求共创建连接: {}", created);
    assert!(created <= 5, "created {} connections", created);
    assert_eq!(pool.metrics().checkouts, 20);
    assert!(pool.status().total <= 5);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_connection_has_a_single_owner() {
    let dir = tempfile::tempdir().unwrap();
    let pool = build_pool(&dir, 3, Arc::new(MemoryEventSink::new()));
    let held: Arc<parking_lot::Mutex<HashSet<u64>>> = Arc::default();

    let mut handles = Vec::new();
    for i in 0..12 {
        let pool = pool.clone();
        let held = Arc::clone(&held);
        handles.push(tokio::spawn(async move {
            for round in 0..5 {
                let ctx = OperationContext::new(format!("owner-{}-{}", i, round));
                let conn = pool
                    .get_connection(ConnectionType::Write, Priority::Normal, &ctx)
                    .await
                    .unwrap();
                let id = conn.id();
                assert!(held.lock().insert(id), "connection {} handed out twice", id);
                tokio::task::yield_now().await;
                assert!(held.lock().remove(&id));
                pool.release_connection(conn);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(pool.metrics().checkouts, 60);
    assert_eq!(pool.metrics().releases, 60);
    assert!(held.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_connection_serializes_operations() {
    let dir = tempfile::tempdir().unwrap();
    let pool = build_pool(&dir, 1, Arc::new(MemoryEventSink::new()));

    let run = |pool: ConnectionPool, name: &'static str| async move {
        let ctx = OperationContext::new(name);
        pool.execute_with_connection(
            |conn| {
                Box::pin(async move {
                    conn.fetch_all("SELECT 1", &[]).await?;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, GuardError>(())
                })
            },
            ConnectionType::Write,
            Priority::Normal,
            &ctx,
        )
        .await
        .unwrap();
        Instant::now()
    };

    let (a, b) = tokio::join!(run(pool.clone(), "first"), run(pool.clone(), "second"));
    let gap = if a > b { a - b } else { b - a };
    println!("🔍 两个操作完成时间间隔: {:?}", gap);
    assert!(gap >= Duration::from_millis(50));
    assert_eq!(pool.metrics().connections_created, 1);
}

#[tokio::test]
async fn test_waiters_are_served_by_priority() {
    let dir = tempfile::tempdir().unwrap();
    let pool = build_pool(&dir, 1, Arc::new(MemoryEventSink::new()));
    let ctx = OperationContext::new("holder");
    let held = pool
        .get_connection(ConnectionType::Write, Priority::Normal, &ctx)
        .await
        .unwrap();

    let order: Arc<parking_lot::Mutex<Vec<Priority>>> = Arc::default();
    let mut handles = Vec::new();
    for priority in [Priority::Low, Priority::Normal, Priority::High] {
        let waiter_pool = pool.clone();
        let order = Arc::clone(&order);
        let expected_queue = handles.len() + 1;
        handles.push(tokio::spawn(async move {
            let ctx = OperationContext::new("waiter");
            let conn = waiter_pool
                .get_connection(ConnectionType::Read, priority, &ctx)
                .await
                .unwrap();
            order.lock().push(priority);
            drop(conn);
        }));
        // 保证按 Low、Normal、High 的顺序登记
        while pool.status().queued < expected_queue {
            tokio::task::yield_now().await;
        }
    }

    drop(held);
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![Priority::High, Priority::Normal, Priority::Low]);
}

#[tokio::test]
async fn test_data_written_through_pool_is_visible_to_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let pool = build_pool(&dir, 2, Arc::new(MemoryEventSink::new()));
    let ctx = OperationContext::new("write");

    pool.execute_transaction(
        |conn| {
            Box::pin(async move {
                conn.execute_script("CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v INTEGER)")
                    .await?;
                conn.execute(
                    "INSERT INTO kv (k, v) VALUES (?, ?)",
                    &[DataValue::from("a"), DataValue::from(1)],
                )
                .await?;
                Ok::<_, GuardError>(())
            })
        },
        &ctx,
    )
    .await
    .unwrap();

    let mut first = pool
        .get_connection(ConnectionType::Read, Priority::Normal, &ctx)
        .await
        .unwrap();
    let mut second = pool
        .get_connection(ConnectionType::Read, Priority::Normal, &ctx)
        .await
        .unwrap();
    assert_ne!(first.id(), second.id());

    for conn in [&mut first, &mut second] {
        let row = conn
            .fetch_optional("SELECT v FROM kv WHERE k = ?", &[DataValue::from("a")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("v"), Some(&DataValue::Int(1)));
    }
}
