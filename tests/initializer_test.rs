//! Schema 初始化协调器的并发测试

mod common;

use common::{temp_config, InstrumentedFactory};
use rat_sqlguard::schema::InitializationReport;
use rat_sqlguard::{
    EngineError, GuardError, InitializationState, SchemaDefinition, SchemaInitializer,
    SqliteErrorCode,
};
use std::sync::Arc;
use std::time::Duration;

fn instrumented(dir: &tempfile::TempDir) -> Arc<InstrumentedFactory> {
    let config = temp_config(dir.path(), 4);
    let mut factory = InstrumentedFactory::sqlite(&config);
    // 拉长初始化窗口，确保并发调用者都落在进行中阶段
    factory.open_delay = Duration::from_millis(50);
    Arc::new(factory)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_runs_one_migration() {
    let dir = tempfile::tempdir().unwrap();
    let factory = instrumented(&dir);
    let init = SchemaInitializer::new(factory.clone(), SchemaDefinition::application_default());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let init = init.clone();
        handles.push(tokio::spawn(async move { init.initialize().await }));
    }

    let mut reports: Vec<InitializationReport> = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap().unwrap());
    }

    println!("🔍 BEGIN次数: {}, 打开连接次数: {}", factory.probe.begins(), factory.probe.opens());
    assert_eq!(factory.probe.begins(), 1);
    assert_eq!(factory.probe.opens(), 1);
    assert!(reports.iter().all(|r| r == &reports[0]));
    assert!(reports[0].created);
    assert_eq!(init.state(), InitializationState::Completed);
}

#[tokio::test]
async fn test_initialize_after_completion_mutates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let factory = instrumented(&dir);
    let init = SchemaInitializer::new(factory.clone(), SchemaDefinition::application_default());

    init.initialize().await.unwrap();
    let mutations = factory.probe.mutations();
    let statements = factory.probe.statements.lock().len();
    assert!(mutations > 0);

    for _ in 0..3 {
        init.initialize().await.unwrap();
    }
    init.wait_for_initialization().await.unwrap();

    assert_eq!(factory.probe.mutations(), mutations);
    assert_eq!(factory.probe.statements.lock().len(), statements);
    assert_eq!(factory.probe.opens(), 1);
}

#[tokio::test]
async fn test_existing_schema_detected_without_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let factory = instrumented(&dir);

    SchemaInitializer::new(factory.clone(), SchemaDefinition::application_default())
        .initialize()
        .await
        .unwrap();
    assert_eq!(factory.probe.begins(), 1);

    // 新协调器（相当于进程重启）只探测，不再建表
    let report = SchemaInitializer::new(factory.clone(), SchemaDefinition::application_default())
        .initialize()
        .await
        .unwrap();
    assert!(!report.created);
    assert_eq!(factory.probe.begins(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_observe_identical_failure() {
    let dir = tempfile::tempdir().unwrap();
    let factory = instrumented(&dir);
    let schema = SchemaDefinition::from_script(["t"], "CREATE TABLE t (id INTEGER); CREATE TABL broken");
    let init = SchemaInitializer::new(factory.clone(), schema);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let init = init.clone();
        handles.push(tokio::spawn(async move { init.initialize().await }));
    }

    let mut messages = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Err(GuardError::InitializationFailed { message }) => messages.push(message),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    assert!(messages.iter().all(|m| m == &messages[0]));
    assert_eq!(factory.probe.opens(), 1);
    assert_eq!(init.state(), InitializationState::Failed);

    // 失败保持到下一次显式调用
    let waited = init.wait_for_initialization().await.err().unwrap();
    assert!(matches!(waited, GuardError::InitializationFailed { ref message } if message == &messages[0]));
    assert_eq!(factory.probe.opens(), 1);

    // 再次 initialize 会重新尝试
    assert!(init.initialize().await.is_err());
    assert_eq!(factory.probe.opens(), 2);
}

#[tokio::test]
async fn test_failed_initialization_can_succeed_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let factory = instrumented(&dir);
    // 第一次探测就失败
    factory
        .probe
        .inject(EngineError::new(SqliteErrorCode::IoErr, "disk I/O error"), 1);
    let init = SchemaInitializer::new(factory.clone(), SchemaDefinition::application_default());

    assert!(init.initialize().await.is_err());
    assert_eq!(init.state(), InitializationState::Failed);

    let report = init.initialize().await.unwrap();
    assert!(report.created);
    assert_eq!(init.state(), InitializationState::Completed);
    assert_eq!(factory.probe.begins(), 1);
}
