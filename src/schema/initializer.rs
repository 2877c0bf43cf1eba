//! Schema 初始化协调器
//!
//! 保证并发调用下 Schema 只初始化一次。进行中的初始化以共享 future 保存，
//! 后来的调用者等待同一个 future，所有人看到同一个结果

use super::definition::{index_target, is_index_statement, quote_identifier, SchemaDefinition};
use crate::adapter::{ConnectionFactory, EngineConnection};
use crate::error::{GuardError, GuardResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rat_logger::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// 初始化状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitializationState {
    /// 尚未开始
    NotStarted,
    /// 进行中
    InProgress,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

/// 一次初始化的执行摘要
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationReport {
    /// 是否执行了完整建库（否则为已有 Schema，只做列升级）
    pub created: bool,
    /// 执行的语句数
    pub statements_executed: usize,
    /// 因缺少列而跳过的索引
    pub skipped_indexes: Vec<String>,
    /// 新增的列（`表.列`）
    pub columns_added: Vec<String>,
    /// 执行的默认数据语句数
    pub seeds_applied: usize,
}

type InitFuture = Shared<BoxFuture<'static, Result<InitializationReport, String>>>;

enum Phase {
    NotStarted,
    InProgress(InitFuture),
    Completed(InitializationReport),
    Failed(String),
}

struct Coordinator {
    phase: Phase,
    // reset 之后旧任务的结果不再写回
    generation: u64,
}

/// Schema 初始化协调器
#[derive(Clone)]
pub struct SchemaInitializer {
    factory: Arc<dyn ConnectionFactory>,
    schema: Arc<SchemaDefinition>,
    coordinator: Arc<Mutex<Coordinator>>,
}

impl SchemaInitializer {
    /// 创建协调器，初始状态为 NotStarted
    pub fn new(factory: Arc<dyn ConnectionFactory>, schema: SchemaDefinition) -> Self {
        Self {
            factory,
            schema: Arc::new(schema),
            coordinator: Arc::new(Mutex::new(Coordinator {
                phase: Phase::NotStarted,
                generation: 0,
            })),
        }
    }

    /// 执行初始化
    ///
    /// 已完成时立即返回；进行中时等待同一次初始化；上次失败时重新开始
    pub async fn initialize(&self) -> GuardResult<InitializationReport> {
        let in_flight = {
            let mut coordinator = self.coordinator.lock();
            let existing = match &coordinator.phase {
                Phase::Completed(report) => return Ok(report.clone()),
                Phase::InProgress(fut) => Some(fut.clone()),
                Phase::Failed(message) => {
                    info!("上次Schema初始化失败（{}），重新开始", message);
                    None
                }
                Phase::NotStarted => None,
            };

            match existing {
                Some(fut) => fut,
                None => {
                    coordinator.generation += 1;
                    let fut = self.start(coordinator.generation);
                    coordinator.phase = Phase::InProgress(fut.clone());
                    fut
                }
            }
        };

        in_flight
            .await
            .map_err(|message| GuardError::InitializationFailed { message })
    }

    /// 等待初始化结束
    ///
    /// 不会主动开始初始化；从未开始过时返回 `NotInitialized`
    pub async fn wait_for_initialization(&self) -> GuardResult<()> {
        let in_flight = {
            let coordinator = self.coordinator.lock();
            match &coordinator.phase {
                Phase::Completed(_) => return Ok(()),
                Phase::Failed(message) => {
                    return Err(GuardError::InitializationFailed {
                        message: message.clone(),
                    });
                }
                Phase::NotStarted => return Err(GuardError::NotInitialized),
                Phase::InProgress(fut) => fut.clone(),
            }
        };

        in_flight
            .await
            .map(|_| ())
            .map_err(|message| GuardError::InitializationFailed { message })
    }

    /// 当前状态
    pub fn state(&self) -> InitializationState {
        match self.coordinator.lock().phase {
            Phase::NotStarted => InitializationState::NotStarted,
            Phase::InProgress(_) => InitializationState::InProgress,
            Phase::Completed(_) => InitializationState::Completed,
            Phase::Failed(_) => InitializationState::Failed,
        }
    }

    /// 是否已完成
    pub fn is_initialized(&self) -> bool {
        self.state() == InitializationState::Completed
    }

    /// 回到 NotStarted
    ///
    /// 进行中的任务会继续跑完，但其结果不再影响状态
    pub fn reset(&self) {
        let mut coordinator = self.coordinator.lock();
        coordinator.generation += 1;
        coordinator.phase = Phase::NotStarted;
        debug!("Schema初始化状态已重置");
    }

    /// Schema 定义
    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    /// 在后台任务中执行初始化，返回可共享的结果 future
    ///
    /// 任务独立于调用者运行，调用者被取消不会中断初始化
    fn start(&self, generation: u64) -> InitFuture {
        let factory = Arc::clone(&self.factory);
        let schema = Arc::clone(&self.schema);
        let coordinator = Arc::clone(&self.coordinator);

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = run_initialization(factory.as_ref(), &schema)
                .await
                .map_err(|e| e.to_string());

            match &result {
                Ok(report) => info!(
                    "Schema初始化完成: 新建={}, 语句数={}, 新增列={}, 耗时={:?}",
                    report.created,
                    report.statements_executed,
                    report.columns_added.len(),
                    started.elapsed()
                ),
                Err(message) => error!("Schema初始化失败: {}", message),
            }

            let mut state = coordinator.lock();
            if state.generation == generation {
                state.phase = match &result {
                    Ok(report) => Phase::Completed(report.clone()),
                    Err(message) => Phase::Failed(message.clone()),
                };
            }
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(format!("初始化任务异常终止: {}", e)),
            }
        }
        .boxed()
        .shared()
    }
}

async fn run_initialization(
    factory: &dyn ConnectionFactory,
    schema: &SchemaDefinition,
) -> GuardResult<InitializationReport> {
    info!("开始Schema初始化: 目标={}", factory.describe());
    let mut conn = factory.open().await?;
    let result = migrate(conn.as_mut(), schema).await;

    if let Err(e) = conn.close().await {
        debug!("关闭初始化连接时出错: {}", e);
    }
    result
}

async fn migrate(
    conn: &mut dyn EngineConnection,
    schema: &SchemaDefinition,
) -> GuardResult<InitializationReport> {
    let mut report = InitializationReport::default();

    if schema_present(conn, schema).await? {
        debug!("必需表均已存在，跳过建表，只检查列升级");
        apply_column_upgrades(conn, schema, &mut report).await?;
        return Ok(report);
    }

    report.created = true;
    conn.begin().await?;
    match create_schema(conn, schema, &mut report).await {
        Ok(()) => {
            conn.commit().await?;
            Ok(report)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.rollback().await {
                warn!("Schema初始化回滚失败: {}", rollback_err);
            }
            Err(e)
        }
    }
}

/// 通过 sqlite_master 检查必需表是否都存在
async fn schema_present(conn: &mut dyn EngineConnection, schema: &SchemaDefinition) -> GuardResult<bool> {
    if schema.required_tables.is_empty() {
        return Ok(false);
    }

    let rows = conn
        .fetch_all("SELECT name FROM sqlite_master WHERE type = 'table'", &[])
        .await?;
    let existing: HashSet<String> = rows
        .iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(str::to_lowercase))
        .collect();

    Ok(schema
        .required_tables
        .iter()
        .all(|table| existing.contains(&table.to_lowercase())))
}

/// 表的现有列（小写）；表不存在时为空
async fn table_columns(conn: &mut dyn EngineConnection, table: &str) -> GuardResult<HashSet<String>> {
    let sql = format!("PRAGMA table_info({})", quote_identifier(table));
    let rows = conn.fetch_all(&sql, &[]).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(str::to_lowercase))
        .collect())
}

async fn apply_column_upgrades(
    conn: &mut dyn EngineConnection,
    schema: &SchemaDefinition,
    report: &mut InitializationReport,
) -> GuardResult<()> {
    for upgrade in &schema.column_upgrades {
        let columns = table_columns(conn, &upgrade.table).await?;
        if columns.is_empty() || columns.contains(&upgrade.column.to_lowercase()) {
            continue;
        }

        match conn.execute_script(&upgrade.to_sql()).await {
            Ok(()) => {
                info!("新增列: {}.{}", upgrade.table, upgrade.column);
                report.columns_added.push(format!("{}.{}", upgrade.table, upgrade.column));
            }
            Err(e) if e.is_already_exists() => {
                debug!("列 {}.{} 已存在", upgrade.table, upgrade.column);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// 完整建库：建表语句 → 列升级 → 索引 → 默认数据
///
/// 索引放在列升级之后，旧表补齐列后索引才能建立
async fn create_schema(
    conn: &mut dyn EngineConnection,
    schema: &SchemaDefinition,
    report: &mut InitializationReport,
) -> GuardResult<()> {
    let (indexes, tables): (Vec<&String>, Vec<&String>) = schema
        .statements
        .iter()
        .partition(|stmt| is_index_statement(stmt));

    for stmt in tables {
        execute_tolerant(conn, stmt, report).await?;
    }

    apply_column_upgrades(conn, schema, report).await?;

    for stmt in indexes {
        if let Some((table, columns)) = index_target(stmt) {
            let present = table_columns(conn, &table).await?;
            let missing: Vec<&String> = columns
                .iter()
                .filter(|col| !present.contains(&col.to_lowercase()))
                .collect();
            if !missing.is_empty() {
                warn!("跳过索引，表 {} 缺少列 {:?}: {}", table, missing, stmt);
                report.skipped_indexes.push(stmt.clone());
                continue;
            }
        }
        execute_tolerant(conn, stmt, report).await?;
    }

    for seed in &schema.seeds {
        conn.execute_script(seed).await?;
        report.seeds_applied += 1;
    }
    Ok(())
}

async fn execute_tolerant(
    conn: &mut dyn EngineConnection,
    stmt: &str,
    report: &mut InitializationReport,
) -> GuardResult<()> {
    match conn.execute_script(stmt).await {
        Ok(()) => {
            report.statements_executed += 1;
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!("对象已存在，继续: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteConnectionFactory;
    use crate::config::DatabaseConfig;
    use crate::types::DataValue;

    fn file_factory(dir: &tempfile::TempDir) -> Arc<dyn ConnectionFactory> {
        let config = DatabaseConfig::new(dir.path().join("init.db"));
        Arc::new(SqliteConnectionFactory::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_fresh_database_is_created_and_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let factory = file_factory(&dir);
        let init = SchemaInitializer::new(factory.clone(), SchemaDefinition::application_default());
        assert_eq!(init.state(), InitializationState::NotStarted);

        let report = init.initialize().await.unwrap();
        assert!(report.created);
        assert_eq!(report.statements_executed, 5);
        assert_eq!(report.seeds_applied, 1);
        assert!(report.skipped_indexes.is_empty());
        assert_eq!(init.state(), InitializationState::Completed);

        let mut conn = factory.open().await.unwrap();
        let rows = conn
            .fetch_all("SELECT role FROM users WHERE username = 'admin'", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("role"), Some(&DataValue::String("admin".to_string())));

        // 已完成后直接返回同一份摘要
        assert_eq!(init.initialize().await.unwrap(), report);
        init.wait_for_initialization().await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_schema_only_gets_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let factory = file_factory(&dir);
        {
            let mut conn = factory.open().await.unwrap();
            conn.execute_script(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, email TEXT, hashed_password TEXT);
                 CREATE TABLE market_analyses (id TEXT PRIMARY KEY, user_id INTEGER, updated_at TEXT);",
            )
            .await
            .unwrap();
        }

        let init = SchemaInitializer::new(factory.clone(), SchemaDefinition::application_default());
        let report = init.initialize().await.unwrap();
        assert!(!report.created);
        assert_eq!(report.statements_executed, 0);
        assert_eq!(report.columns_added, vec!["users.role", "users.created_at"]);

        // 新的协调器再跑一次不再有任何变更
        let again = SchemaInitializer::new(factory, SchemaDefinition::application_default());
        let report = again.initialize().await.unwrap();
        assert!(report.columns_added.is_empty());
    }

    #[tokio::test]
    async fn test_index_on_missing_column_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let factory = file_factory(&dir);
        let schema = SchemaDefinition::from_script(
            ["items"],
            "CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, name TEXT);
             CREATE INDEX IF NOT EXISTS idx_items_name ON items (name);
             CREATE INDEX IF NOT EXISTS idx_items_sku ON items (sku);",
        );

        let report = SchemaInitializer::new(factory, schema).initialize().await.unwrap();
        assert_eq!(report.statements_executed, 2);
        assert_eq!(report.skipped_indexes.len(), 1);
        assert!(report.skipped_indexes[0].contains("idx_items_sku"));
    }

    #[tokio::test]
    async fn test_wait_before_start_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let init = SchemaInitializer::new(file_factory(&dir), SchemaDefinition::application_default());
        assert!(matches!(
            init.wait_for_initialization().await,
            Err(GuardError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_failure_is_sticky_until_next_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let factory = file_factory(&dir);
        let broken = SchemaDefinition::from_script(["t"], "CREATE TABLE t (id INTEGER); CREATE TABLEE oops");
        let init = SchemaInitializer::new(factory.clone(), broken);

        let first = init.initialize().await.err().unwrap();
        assert_eq!(init.state(), InitializationState::Failed);
        let waited = init.wait_for_initialization().await.err().unwrap();
        assert_eq!(first.to_string(), waited.to_string());

        // 事务已回滚，表 t 不存在
        let mut conn = factory.open().await.unwrap();
        let rows = conn
            .fetch_all("SELECT name FROM sqlite_master WHERE name = 't'", &[])
            .await
            .unwrap();
        assert!(rows.is_empty());

        init.reset();
        assert_eq!(init.state(), InitializationState::NotStarted);
    }
}
