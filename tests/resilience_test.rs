//! 重试与熔断在连接池上的端到端行为

mod common;

use common::{temp_config, InstrumentedFactory};
use rat_sqlguard::{
    CircuitBreakerConfig, CircuitPhase, ConnectionFactory, ConnectionPool, ConnectionType,
    DatabaseEventKind, EngineConnection, EngineError, ErrorCategory, GuardError, MemoryEventSink,
    OperationContext, Priority, SqliteErrorCode,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_critical_errors_open_breaker_below_failure_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path(), 2);
    let factory = Arc::new(InstrumentedFactory::sqlite(&config));
    factory.probe.inject(
        EngineError::new(SqliteErrorCode::Corrupt, "database disk image is malformed"),
        2,
    );
    let sink = Arc::new(MemoryEventSink::new());
    let pool = ConnectionPool::new(
        config.pool.clone(),
        CircuitBreakerConfig {
            failure_threshold: 10,
            critical_error_threshold: 2,
            ..CircuitBreakerConfig::default()
        },
        factory.clone(),
        sink.clone(),
    );
    let ctx = OperationContext::new("corrupt");

    let err = pool
        .execute_with_connection(
            |conn| Box::pin(async move { conn.fetch_all("SELECT 1", &[]).await }),
            ConnectionType::Read,
            Priority::Normal,
            &ctx,
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Critical);
    let snapshot = pool.circuit_breaker().snapshot();
    println!("🔍 熔断器状态: {:?}", snapshot.phase);
    assert_eq!(snapshot.phase, CircuitPhase::Open);
    assert_eq!(snapshot.critical_failure_count, 2);
    // 两次尝试用的连接都被丢弃
    assert_eq!(factory.probe.opens(), 2);
    assert_eq!(pool.status().total, 0);
    assert_eq!(sink.count(DatabaseEventKind::ErrorOccurred), 2);

    let err = pool
        .get_connection(ConnectionType::Read, Priority::High, &ctx)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GuardError::CircuitOpen { remaining_ms } if remaining_ms > 0));
    assert!(err.is_pool_error());
}

#[tokio::test]
async fn test_non_retryable_error_fails_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path(), 1);
    let factory = Arc::new(InstrumentedFactory::sqlite(&config));
    factory.probe.inject(
        EngineError::new(SqliteErrorCode::ReadOnly, "attempt to write a readonly database"),
        1,
    );
    let pool = ConnectionPool::new(
        config.pool.clone(),
        CircuitBreakerConfig::default(),
        factory.clone(),
        Arc::new(MemoryEventSink::new()),
    );

    let err = pool
        .execute_with_connection(
            |conn| Box::pin(async move { conn.execute("DELETE FROM nothing", &[]).await }),
            ConnectionType::Write,
            Priority::Normal,
            &OperationContext::new("readonly"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::NonRetryable);
    assert_eq!(factory.probe.statements.lock().len(), 1);
    assert_eq!(pool.circuit_breaker().phase(), CircuitPhase::Closed);
    // 非严重错误不会丢弃连接
    assert_eq!(pool.status().available, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_lock_contention_is_retried_until_released() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = temp_config(dir.path(), 2);
    config.engine.busy_timeout = Duration::from_millis(20);
    config.pool.retry_base_delay = Duration::from_millis(40);
    config.pool.retry_attempts = 8;

    let factory = Arc::new(InstrumentedFactory::sqlite(&config));
    let sink = Arc::new(MemoryEventSink::new());
    let pool = ConnectionPool::new(
        config.pool.clone(),
        CircuitBreakerConfig {
            failure_threshold: 20,
            ..CircuitBreakerConfig::default()
        },
        factory.clone(),
        sink.clone(),
    );

    // 池外的连接持有写锁
    let mut blocker = factory.open().await.unwrap();
    blocker
        .execute_script("CREATE TABLE counter (n INTEGER); INSERT INTO counter VALUES (0);")
        .await
        .unwrap();
    blocker.begin().await.unwrap();
    blocker.execute("UPDATE counter SET n = n + 1", &[]).await.unwrap();

    let writer = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.execute_with_connection(
                |conn| Box::pin(async move { conn.execute("UPDATE counter SET n = n + 10", &[]).await }),
                ConnectionType::Write,
                Priority::Normal,
                &OperationContext::new("contended_write"),
            )
            .await
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    blocker.commit().await.unwrap();

    let result = writer.await.unwrap().unwrap();
    assert_eq!(result.rows_affected, 1);
    let locks = sink.count(DatabaseEventKind::LockDetected);
    println!("🔍 检测到锁竞争次数: {}", locks);
    assert!(locks >= 1);

    let row = blocker
        .fetch_optional("SELECT n FROM counter", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("n"), Some(&rat_sqlguard::DataValue::Int(11)));
}
