//! SQLite 单连接实现

use super::data_conversion::{bind_params, row_to_map};
use crate::adapter::{EngineConnection, EngineError};
use crate::types::{DataValue, ExecuteResult, Row};
use async_trait::async_trait;
use rat_logger::debug;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;

/// 包装 sqlx 的 SqliteConnection
pub struct SqliteEngineConnection {
    conn: SqliteConnection,
}

impl SqliteEngineConnection {
    pub(crate) fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EngineConnection for SqliteEngineConnection {
    async fn execute(&mut self, sql: &str, params: &[DataValue]) -> Result<ExecuteResult, EngineError> {
        debug!("执行SQLite语句: {}", sql);
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut self.conn)
            .await?;

        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_rowid: result.last_insert_rowid(),
        })
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DataValue]) -> Result<Vec<Row>, EngineError> {
        debug!("执行SQLite查询: {}", sql);
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await?;

        rows.iter().map(row_to_map).collect()
    }

    async fn execute_script(&mut self, sql: &str) -> Result<(), EngineError> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), EngineError> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.conn.close().await?;
        Ok(())
    }
}
