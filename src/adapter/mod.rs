//! 数据库引擎适配层
//!
//! 连接池、初始化器与门面只通过这里定义的两个 trait 访问底层引擎，
//! 测试可以替换为会按需失败的实现

use crate::types::{DataValue, ExecuteResult, Row};
use async_trait::async_trait;

mod error;
mod sqlite;

pub use error::{EngineError, SqliteErrorCode};
pub(crate) use error::is_statement_message;
pub use sqlite::{SqliteConnectionFactory, SqliteEngineConnection};

/// 单个引擎连接
///
/// 同一时刻只会被一个持有者使用，因此方法都接收 `&mut self`
#[async_trait]
pub trait EngineConnection: Send {
    /// 执行一条写语句
    async fn execute(&mut self, sql: &str, params: &[DataValue]) -> Result<ExecuteResult, EngineError>;

    /// 执行查询并返回全部行
    async fn fetch_all(&mut self, sql: &str, params: &[DataValue]) -> Result<Vec<Row>, EngineError>;

    /// 执行查询并返回第一行
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DataValue],
    ) -> Result<Option<Row>, EngineError> {
        let rows = self.fetch_all(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// 执行多条以分号分隔的语句（不支持参数）
    async fn execute_script(&mut self, sql: &str) -> Result<(), EngineError>;

    /// 开启写事务
    ///
    /// 使用 `BEGIN IMMEDIATE` 在事务开始时就获取写锁，
    /// 避免事务中途从读锁升级为写锁时出现无法重试的 BUSY
    async fn begin(&mut self) -> Result<(), EngineError> {
        self.execute_script("BEGIN IMMEDIATE").await
    }

    /// 提交事务
    async fn commit(&mut self) -> Result<(), EngineError> {
        self.execute_script("COMMIT").await
    }

    /// 回滚事务
    async fn rollback(&mut self) -> Result<(), EngineError> {
        self.execute_script("ROLLBACK").await
    }

    /// 检查连接是否可用
    async fn ping(&mut self) -> Result<(), EngineError>;

    /// 关闭连接
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// 引擎连接工厂
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// 打开一个新连接并完成 PRAGMA 调优
    async fn open(&self) -> Result<Box<dyn EngineConnection>, EngineError>;

    /// 连接目标描述（用于日志）
    fn describe(&self) -> String;
}
