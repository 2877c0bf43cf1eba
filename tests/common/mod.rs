//! 集成测试共用的工具：带计数与故障注入的连接工厂

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rat_sqlguard::{
    ConnectionFactory, DataValue, DatabaseConfig, EngineConnection, EngineError, ExecuteResult,
    Row, SqliteConnectionFactory,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 所有连接共享的观测数据
#[derive(Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub begins: AtomicUsize,
    pub mutations: AtomicUsize,
    pub statements: Mutex<Vec<String>>,
    /// 按顺序注入到语句执行上的错误
    pub failures: Mutex<VecDeque<EngineError>>,
}

impl Probe {
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn inject(&self, err: EngineError, times: usize) {
        let mut failures = self.failures.lock();
        for _ in 0..times {
            failures.push_back(err.clone());
        }
    }

    fn observe(&self, sql: &str) -> Result<(), EngineError> {
        let upper = sql.trim_start().to_ascii_uppercase();
        if upper.starts_with("BEGIN") {
            self.begins.fetch_add(1, Ordering::SeqCst);
        }
        if ["CREATE", "ALTER", "INSERT", "UPDATE", "DELETE", "DROP"]
            .iter()
            .any(|kw| upper.starts_with(kw))
        {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        self.statements.lock().push(sql.to_string());

        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// 包装真实 SQLite 工厂，记录每条语句
pub struct InstrumentedFactory {
    inner: Arc<dyn ConnectionFactory>,
    pub probe: Arc<Probe>,
    /// 打开连接前的人为延迟
    pub open_delay: Duration,
}

impl InstrumentedFactory {
    pub fn new(inner: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            inner,
            probe: Arc::new(Probe::default()),
            open_delay: Duration::ZERO,
        }
    }

    pub fn sqlite(config: &DatabaseConfig) -> Self {
        Self::new(Arc::new(SqliteConnectionFactory::new(config).unwrap()))
    }
}

#[async_trait]
impl ConnectionFactory for InstrumentedFactory {
    async fn open(&self) -> Result<Box<dyn EngineConnection>, EngineError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        let inner = self.inner.open().await?;
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InstrumentedConnection {
            inner,
            probe: Arc::clone(&self.probe),
        }))
    }

    fn describe(&self) -> String {
        format!("instrumented({})", self.inner.describe())
    }
}

struct InstrumentedConnection {
    inner: Box<dyn EngineConnection>,
    probe: Arc<Probe>,
}

#[async_trait]
impl EngineConnection for InstrumentedConnection {
    async fn execute(&mut self, sql: &str, params: &[DataValue]) -> Result<ExecuteResult, EngineError> {
        self.probe.observe(sql)?;
        self.inner.execute(sql, params).await
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DataValue]) -> Result<Vec<Row>, EngineError> {
        self.probe.observe(sql)?;
        self.inner.fetch_all(sql, params).await
    }

    async fn execute_script(&mut self, sql: &str) -> Result<(), EngineError> {
        self.probe.observe(sql)?;
        self.inner.execute_script(sql).await
    }

    async fn ping(&mut self) -> Result<(), EngineError> {
        self.inner.ping().await
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.inner.close().await
    }
}

/// 临时目录下的数据库配置，重试延迟调小以加快测试
pub fn temp_config(dir: &Path, max_connections: u32) -> DatabaseConfig {
    let mut config = DatabaseConfig::new(dir.join("test.db"));
    config.pool.max_connections = max_connections;
    config.pool.retry_base_delay = Duration::from_millis(5);
    config.pool.connection_timeout = Duration::from_secs(5);
    config
}
