//! 数据库门面
//!
//! 由一份不可变的 `DatabaseConfig` 组装出连接池与 Schema 初始化协调器，
//! 对外提供查询、执行、事务与健康检查

use crate::adapter::{ConnectionFactory, SqliteConnectionFactory};
use crate::config::DatabaseConfig;
use crate::error::GuardResult;
use crate::events::{EventSink, LoggingEventSink};
use crate::pool::{ConnectionPool, ConnectionType, OperationContext, PooledConnection, Priority};
use crate::schema::{InitializationReport, InitializationState, SchemaDefinition, SchemaInitializer};
use crate::types::{DataValue, ExecuteResult, Row};
use futures::future::BoxFuture;
use rat_logger::info;
use std::sync::Arc;

/// 数据库门面
pub struct Database {
    pub(super) config: DatabaseConfig,
    pub(super) pool: ConnectionPool,
    pub(super) initializer: SchemaInitializer,
}

impl Database {
    /// 使用默认 Schema 与日志事件接收器创建
    pub fn new(config: DatabaseConfig) -> GuardResult<Self> {
        Self::with_schema(config, SchemaDefinition::application_default(), Arc::new(LoggingEventSink))
    }

    /// 指定 Schema 与事件接收器
    pub fn with_schema(
        config: DatabaseConfig,
        schema: SchemaDefinition,
        events: Arc<dyn EventSink>,
    ) -> GuardResult<Self> {
        config.validate()?;
        let factory: Arc<dyn ConnectionFactory> = Arc::new(SqliteConnectionFactory::new(&config)?);
        Self::with_factory(config, factory, schema, events)
    }

    /// 指定连接工厂，连接池与初始化协调器共用同一个工厂
    pub fn with_factory(
        config: DatabaseConfig,
        factory: Arc<dyn ConnectionFactory>,
        schema: SchemaDefinition,
        events: Arc<dyn EventSink>,
    ) -> GuardResult<Self> {
        config.validate()?;
        info!(
            "创建数据库门面: 路径={}, 最大连接数={}",
            config.path.display(),
            config.pool.max_connections
        );

        let pool = ConnectionPool::new(
            config.pool.clone(),
            config.circuit.clone(),
            Arc::clone(&factory),
            events,
        );
        let initializer = SchemaInitializer::new(factory, schema);

        Ok(Self {
            config,
            pool,
            initializer,
        })
    }

    /// 初始化 Schema（并发调用只执行一次）
    pub async fn initialize(&self) -> GuardResult<InitializationReport> {
        self.initializer.initialize().await
    }

    /// 查询前确保 Schema 就绪
    ///
    /// 从未开始时自动开始；上次失败时返回保存的失败，不会自动重试
    async fn ready(&self) -> GuardResult<()> {
        match self.initializer.state() {
            InitializationState::Completed => Ok(()),
            InitializationState::NotStarted => self.initializer.initialize().await.map(|_| ()),
            InitializationState::InProgress | InitializationState::Failed => {
                self.initializer.wait_for_initialization().await
            }
        }
    }

    /// 查询全部行
    pub async fn query(&self, sql: &str, params: &[DataValue]) -> GuardResult<Vec<Row>> {
        self.ready().await?;
        let context = OperationContext::new("query");
        let sql = sql.to_string();
        let params = params.to_vec();

        self.pool
            .execute_with_connection(
                move |conn| {
                    let sql = sql.clone();
                    let params = params.clone();
                    Box::pin(async move { conn.fetch_all(&sql, &params).await })
                },
                ConnectionType::Read,
                Priority::Normal,
                &context,
            )
            .await
    }

    /// 查询第一行
    pub async fn query_one(&self, sql: &str, params: &[DataValue]) -> GuardResult<Option<Row>> {
        self.ready().await?;
        let context = OperationContext::new("query_one");
        let sql = sql.to_string();
        let params = params.to_vec();

        self.pool
            .execute_with_connection(
                move |conn| {
                    let sql = sql.clone();
                    let params = params.clone();
                    Box::pin(async move { conn.fetch_optional(&sql, &params).await })
                },
                ConnectionType::Read,
                Priority::Normal,
                &context,
            )
            .await
    }

    /// 执行写语句
    pub async fn execute(&self, sql: &str, params: &[DataValue]) -> GuardResult<ExecuteResult> {
        self.ready().await?;
        let context = OperationContext::new("execute");
        let sql = sql.to_string();
        let params = params.to_vec();

        self.pool
            .execute_with_connection(
                move |conn| {
                    let sql = sql.clone();
                    let params = params.clone();
                    Box::pin(async move { conn.execute(&sql, &params).await })
                },
                ConnectionType::Write,
                Priority::Normal,
                &context,
            )
            .await
    }

    /// 在事务中执行操作
    ///
    /// 操作可能因锁竞争被整体重试，因此必须可重复执行
    pub async fn transaction<T, F>(&self, op: F) -> GuardResult<T>
    where
        F: for<'c> FnMut(&'c mut PooledConnection) -> BoxFuture<'c, GuardResult<T>> + Send,
        T: Send,
    {
        self.ready().await?;
        let context = OperationContext::new("transaction");
        self.pool.execute_transaction(op, &context).await
    }

    /// 配置
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// 连接池
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Schema 初始化协调器
    pub fn initializer(&self) -> &SchemaInitializer {
        &self.initializer
    }
}
