//! SQLite 连接工厂
//!
//! 连接参数在构造时解析一次，之后每个新连接都带着同样的 PRAGMA 打开

use super::connection::SqliteEngineConnection;
use crate::adapter::{ConnectionFactory, EngineConnection, EngineError};
use crate::config::DatabaseConfig;
use crate::error::GuardResult;
use async_trait::async_trait;
use rat_logger::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::Connection;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// SQLite 连接工厂
#[derive(Clone)]
pub struct SqliteConnectionFactory {
    options: SqliteConnectOptions,
    description: String,
    // 内存库的保活连接，工厂存活期间库内容不会因连接全部关闭而丢失
    anchor: Option<Arc<OnceCell<Mutex<SqliteConnection>>>>,
}

impl std::fmt::Debug for SqliteConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnectionFactory")
            .field("description", &self.description)
            .field("memory", &self.anchor.is_some())
            .finish()
    }
}

impl SqliteConnectionFactory {
    /// 根据数据库配置创建工厂
    ///
    /// 内存数据库使用共享缓存模式，同一工厂打开的所有连接看到同一个库，
    /// 工厂额外持有一个保活连接
    pub fn new(config: &DatabaseConfig) -> GuardResult<Self> {
        let tuning = &config.engine;

        let base = if config.is_memory() {
            info!("使用SQLite内存数据库（共享缓存）");
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if config.create_if_missing {
                if let Some(parent) = config.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            crate::quick_error!(
                                connection,
                                format!("创建SQLite数据库目录失败: {}", e)
                            )
                        })?;
                    }
                }
            }
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(config.create_if_missing)
        };

        let journal_mode = SqliteJournalMode::from_str(&tuning.journal_mode).map_err(|e| {
            crate::quick_error!(config, format!("无效的journal_mode '{}': {}", tuning.journal_mode, e))
        })?;
        let synchronous = SqliteSynchronous::from_str(&tuning.synchronous).map_err(|e| {
            crate::quick_error!(config, format!("无效的synchronous '{}': {}", tuning.synchronous, e))
        })?;

        let options = base
            .journal_mode(journal_mode)
            .synchronous(synchronous)
            .busy_timeout(tuning.busy_timeout)
            .foreign_keys(tuning.foreign_keys)
            .pragma("cache_size", Cow::Owned(tuning.cache_size.to_string()));

        Ok(Self {
            options,
            description: config.path.display().to_string(),
            anchor: config.is_memory().then(|| Arc::new(OnceCell::new())),
        })
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    async fn open(&self) -> Result<Box<dyn EngineConnection>, EngineError> {
        if let Some(anchor) = &self.anchor {
            anchor
                .get_or_try_init(|| async {
                    let conn = SqliteConnection::connect_with(&self.options).await?;
                    Ok::<_, EngineError>(Mutex::new(conn))
                })
                .await?;
        }
        let conn = SqliteConnection::connect_with(&self.options).await?;
        debug!("打开SQLite连接: {}", self.description);
        Ok(Box::new(SqliteEngineConnection::new(conn)))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataValue;

    #[tokio::test]
    async fn test_memory_connections_share_one_database() {
        let factory = SqliteConnectionFactory::new(&DatabaseConfig::new(":memory:")).unwrap();
        let mut first = factory.open().await.unwrap();
        let mut second = factory.open().await.unwrap();

        first
            .execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        first
            .execute("INSERT INTO t (name) VALUES (?)", &[DataValue::from("a")])
            .await
            .unwrap();

        let rows = second.fetch_all("SELECT name FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&DataValue::String("a".to_string())));

        // 普通连接全部关闭后数据仍在
        first.close().await.unwrap();
        second.close().await.unwrap();
        let mut third = factory.open().await.unwrap();
        let rows = third.fetch_all("SELECT name FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_pragmas_applied_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::new(dir.path().join("nested").join("p.db"));
        let factory = SqliteConnectionFactory::new(&config).unwrap();
        let mut conn = factory.open().await.unwrap();

        let row = conn.fetch_optional("PRAGMA journal_mode", &[]).await.unwrap().unwrap();
        assert_eq!(row.get("journal_mode"), Some(&DataValue::String("wal".to_string())));

        let row = conn.fetch_optional("PRAGMA foreign_keys", &[]).await.unwrap().unwrap();
        assert_eq!(row.get("foreign_keys"), Some(&DataValue::Int(1)));

        let row = conn.fetch_optional("PRAGMA busy_timeout", &[]).await.unwrap().unwrap();
        assert_eq!(row.get("timeout"), Some(&DataValue::Int(30000)));
    }

    #[tokio::test]
    async fn test_missing_file_without_create_is_cant_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DatabaseConfig::new(dir.path().join("absent.db"));
        config.create_if_missing = false;
        let factory = SqliteConnectionFactory::new(&config).unwrap();

        let err = factory.open().await.err().unwrap();
        assert_eq!(err.code, Some(crate::adapter::SqliteErrorCode::CantOpen));
    }
}
